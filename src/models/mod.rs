// src/models/mod.rs

pub mod comment;
pub mod identity;
pub mod notification;
pub mod object;
pub mod post;
pub mod profile;
