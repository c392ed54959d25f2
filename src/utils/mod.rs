//! Common utilities and helper functions
//!
//! This module provides shared utilities used by both the coordinator
//! and the broker processes.

pub mod retry;

use rand::Rng;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Draw a process-local broker id
///
/// The value is 31 bits wide (top bit cleared) so it is always a
/// non-negative `i32`. Ids are not coordinated; collisions are treated as
/// negligible.
pub fn random_broker_id() -> i32 {
    let raw: u32 = rand::thread_rng().gen();
    (raw & 0x7fff_ffff) as i32
}

/// Age in milliseconds of a timestamp relative to `now`
pub fn age_millis(now: i64, then: i64) -> i64 {
    now.saturating_sub(then)
}
