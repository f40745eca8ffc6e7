//! # Synthetic Tip Source
//!
//! Development mode stand-in for the reed switch. It replays a fixed shower
//! pattern forever: a burst of tips with uneven gaps, then a pause long
//! enough for the engine to close the rainfall. Every tip is followed by a
//! contact bounce a few milliseconds later, which the debounce must swallow.

use log::debug;
use rain_bucket_lib::{clock::MonotonicClock, TipCapture};
use std::sync::Arc;
use std::time::Duration;

/// Gaps between the tips of one shower, in milliseconds
pub const SHOWER_GAPS_MS: [u64; 10] = [
    4_000, 3_500, 6_000, 2_500, 2_000, 8_000, 12_000, 5_000, 20_000, 9_000,
];

/// Dry spell between two showers
pub const PAUSE_MS: u64 = 10 * 60_000;

/// Delay of the simulated contact bounce after a tip
pub const BOUNCE_MS: u64 = 40;

/// Delays before each synthetic tip: one shower, one pause, repeated.
pub fn tip_delays() -> impl Iterator<Item = Duration> {
    SHOWER_GAPS_MS
        .into_iter()
        .chain(std::iter::once(PAUSE_MS))
        .cycle()
        .map(Duration::from_millis)
}

/// Feed synthetic tips (and their bounces) into the capture forever.
pub async fn run(capture: Arc<TipCapture>, clock: MonotonicClock) {
    for delay in tip_delays() {
        tokio::time::sleep(delay).await;
        capture.on_interrupt(clock.millis());

        tokio::time::sleep(Duration::from_millis(BOUNCE_MS)).await;
        let bounced = capture.on_interrupt(clock.millis());
        debug!("simulated tip, bounce accepted: {}", bounced);
    }
}
