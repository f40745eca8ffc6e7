//! # Rain Bucket Core Library
//!
//! This library turns the tips of a tipping-bucket rain gauge into rainfall
//! metrics: whether it is raining, how much has fallen, for how long, how
//! fast, and how severe that is. It is written for the constraints of a
//! small embedded target: the tip path runs in interrupt context, the rest in
//! a cooperative main loop polled every few seconds.
//!
//! ## Design Philosophy
//!
//! ### Memory Efficiency
//! - **Fixed-size state**: the capture ring and the statistics are plain
//!   fixed-size structures; nothing in the tip or evaluation path allocates
//! - **Word-sized sharing**: the interrupt publishes tips through
//!   `AtomicU32` counters and slots, no locks
//!
//! ### Time
//! - **Millis**: monotonic `u32` milliseconds since boot, wrapping after
//!   ~49.7 days; every difference is a wrapping subtraction
//! - **Seconds**: durations and gaps are reported in whole seconds, rounded
//!   half up so short showers do not collapse to zero
//! - **Epoch**: tip times are boot relative until the boot epoch is known
//!
//! ### Data Flow
//! 1. **Interrupt**: [`capture::TipCapture::on_interrupt`] debounces and publishes
//! 2. **Main loop**: [`engine::RainfallEngine::measure`] drains and evaluates
//! 3. **Output**: [`engine::RainfallSink`] hooks and getters, or a JSON
//!    [`engine::RainfallReport`]
//! 4. **Persistence**: [`storage`] keeps the statistics across reboots

pub mod capture;
pub mod clock;
pub mod config;
pub mod engine;
pub mod intensity;
pub mod statistics;
pub mod storage;

pub use capture::{TipBatch, TipCapture};
pub use engine::{Phase, RainfallEngine, RainfallReport, RainfallSink, Resume};
pub use intensity::Intensity;
pub use statistics::{Statistics, StatisticsSnapshot};

pub const VERSION: &str = concat!("RAIN_BUCKET ", env!("CARGO_PKG_VERSION"));

/// Monotonic milliseconds since boot, wrapping.
pub type Millis = u32;

/// Convert milliseconds to whole seconds, rounding half up.
///
/// # Example
/// ```
/// use rain_bucket_lib::millis_to_secs;
///
/// assert_eq!(millis_to_secs(1_499), 1);
/// assert_eq!(millis_to_secs(1_500), 2);
/// assert_eq!(millis_to_secs(u32::MAX), 4_294_967);
/// ```
pub fn millis_to_secs(ms: Millis) -> u32 {
    ((u64::from(ms) + 500) / 1_000) as u32
}

/// Milliseconds from `then` to `now` across clock wraparound.
///
/// A `then` slightly after `now` (a tip published after the caller sampled
/// the clock) counts as no time at all rather than as a near-full wrap.
///
/// # Example
/// ```
/// use rain_bucket_lib::elapsed_since;
///
/// assert_eq!(elapsed_since(5_000, 2_000), 3_000);
/// assert_eq!(elapsed_since(1_000, u32::MAX - 999), 2_000);
/// assert_eq!(elapsed_since(1_900, 2_000), 0);
/// ```
pub fn elapsed_since(now: Millis, then: Millis) -> Millis {
    let elapsed = now.wrapping_sub(then);
    if elapsed > Millis::MAX / 2 {
        0
    } else {
        elapsed
    }
}
