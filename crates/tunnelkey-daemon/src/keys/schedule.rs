//! Rotation timing rules.
//!
//! Pure functions of the key state and the current time, shared by the
//! executor's due check and the background loop's wait computation.

use std::time::{Duration, SystemTime};

use super::error::KeysError;
use super::receiver::KeyState;

/// Wait after a failed scheduled rotation. Fixed, not exponential.
pub const FAILURE_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Wait used when the computed deadline has already passed.
pub const MIN_WAIT: Duration = Duration::from_secs(1);

/// Whether a rotation should happen now.
///
/// Forced rotations are always due. Otherwise the interval must be defined;
/// a missing key is due, and an existing key is due once
/// `generated_at + interval` has been reached.
pub fn is_due(force: bool, state: &KeyState, now: SystemTime) -> Result<bool, KeysError> {
    if force {
        return Ok(true);
    }
    if state.interval.is_zero() {
        return Err(KeysError::IntervalUndefined);
    }
    if !state.has_active_key() {
        return Ok(true);
    }
    Ok(now >= deadline(state.generated_at, state.interval))
}

/// How long the background loop sleeps before its next check.
///
/// After a failed attempt the wait is [`FAILURE_RETRY_INTERVAL`] counted from
/// `now`. A deadline that is already due yields [`MIN_WAIT`] instead of a
/// busy loop.
pub fn next_wait(
    generated_at: Option<SystemTime>,
    interval: Duration,
    last_attempt_failed: bool,
    now: SystemTime,
) -> Duration {
    if last_attempt_failed {
        return FAILURE_RETRY_INTERVAL;
    }
    match deadline(generated_at, interval).duration_since(now) {
        Ok(wait) if !wait.is_zero() => wait,
        _ => MIN_WAIT,
    }
}

fn deadline(generated_at: Option<SystemTime>, interval: Duration) -> SystemTime {
    let base = generated_at.unwrap_or(SystemTime::UNIX_EPOCH);
    base.checked_add(interval).unwrap_or(base)
}
