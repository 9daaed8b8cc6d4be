//! Wall-clock helpers shared by the core and sweeper. The resolver compares
//! against the same reference clock the chains use for block timestamps
//! (§3); `chrono::Utc::now()` is the teacher's timestamp source throughout
//! `eth/utils.rs`.

/// Seconds since the epoch, for `OrderState::created_at`/`updated_at`.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Seconds since the epoch truncated to `u32`, for comparison against the
/// packed on-chain timelocks (§3, §6). Valid until 2106.
pub fn now_u32() -> u32 {
    now_ts().max(0) as u32
}
