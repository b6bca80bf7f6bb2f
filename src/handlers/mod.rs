// src/handlers/mod.rs

pub mod auth;
pub mod interaction;
pub mod notification;
pub mod posts;
pub mod profile;
pub mod realtime;
pub mod storage;
