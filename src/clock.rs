//! # Time Sources
//!
//! The engine runs on a wrapping 32-bit millisecond counter, the same shape
//! as a microcontroller's `millis()`. On the host that counter is derived
//! from [`std::time::Instant`]; the absolute boot epoch is recovered from the
//! wall clock once it can be trusted.

use crate::Millis;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Monotonic milliseconds since construction, wrapping at `u32::MAX`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }

    pub fn millis(&self) -> Millis {
        // Truncation is the wraparound
        self.uptime().as_millis() as Millis
    }

    pub fn uptime(&self) -> Duration {
        self.boot.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall clock readings before 2025-01-01 UTC come from an unset RTC.
pub const TRUSTED_SINCE: u64 = 1_735_689_600;

/// Boot epoch in seconds, given the wall clock `now` and the time since boot.
///
/// Returns `None` while the wall clock cannot be trusted: before
/// [`TRUSTED_SINCE`], before `not_before` (e.g. the last tip already on
/// record), or before boot. An RTC that is unset or restored from a stale
/// save reports exactly that until network time corrects it.
pub fn boot_epoch_at(now: DateTime<Utc>, uptime: Duration, not_before: u64) -> Option<u64> {
    let now = u64::try_from(now.timestamp()).ok()?;
    if now < not_before.max(TRUSTED_SINCE) {
        return None;
    }
    now.checked_sub(uptime.as_secs())
}

/// Boot epoch from the system wall clock.
pub fn boot_epoch_from_wall_clock(uptime: Duration, not_before: u64) -> Option<u64> {
    boot_epoch_at(Utc::now(), uptime, not_before)
}
