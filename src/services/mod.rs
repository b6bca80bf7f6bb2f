//! Queries and side effects shared by several handlers.

pub mod feed;
pub mod notify;
