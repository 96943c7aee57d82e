//! Quarantine backoff policy
//!
//! The window starts at 15 minutes on the first terminal failure and doubles
//! with each consecutive one, capped at 24 hours. The count resets on any
//! successful refresh or user reconnection.

use std::time::Duration;

/// Initial quarantine window after the first terminal failure.
const INITIAL_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Upper bound for the quarantine window.
const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Quarantine window for the given consecutive terminal-failure count.
///
/// `consecutive_failures` is the count including the failure being recorded,
/// so the first failure passes 1. A count of 0 is treated as 1.
pub fn quarantine_window(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(31);
    let window = INITIAL_WINDOW.saturating_mul(1u32 << exponent);
    window.min(MAX_WINDOW)
}
