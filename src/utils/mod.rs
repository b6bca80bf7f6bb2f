// src/utils/mod.rs

pub mod hash;
pub mod html;
pub mod jwt;
pub mod text;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at microsecond precision, the resolution feed cursors carry.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
