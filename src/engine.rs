//! # Rainfall Engine
//!
//! Main-loop half of the gauge. Each call to [`RainfallEngine::measure`]
//! drains the tips published by the interrupt side, folds them into the
//! rainfall statistics and drives a two-state machine:
//!
//! ```text
//!            count >= start_tips
//!   Idle ─────────────────────────► Active
//!    ▲  │                             │
//!    │  │ single tip, silence         │ silence > offset limit
//!    │  │ > offset max (false start)  │
//!    │  ▼                             │
//!    └──── reset ◄────────────────────┘
//! ```
//!
//! ## End of Rainfall
//!
//! A rainfall ends after a silence longer than the adaptive offset limit
//! `min(max_gap × GAP_MULTIPLIER, offset_max)`. Light rain with long natural
//! gaps gets a long limit; a dense shower is closed quickly once it stops.
//!
//! ## Derived Values
//!
//! - **Volume**: `tips × bucket_factor` millimeters
//! - **Duration**: seconds from the first to the last tip, rounded half up
//! - **Rate**: `(tips − 1) / duration × bucket_factor × 3600` mm/h, undefined
//!   while the duration is zero
//! - **Intensity**: [`Intensity::classify`] of the rate and elapsed hours

use crate::capture::TipCapture;
use crate::config::GaugeConfig;
use crate::intensity::Intensity;
use crate::statistics::{Statistics, StatisticsSnapshot};
use crate::{elapsed_since, millis_to_secs, Millis};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Multiplier of the largest inter-tip gap giving the offset limit.
pub const GAP_MULTIPLIER: u32 = 5;

/// A rainfall needs two tips before a rate exists.
pub const MIN_START_TIPS: u32 = 2;

const SECS_PER_HOUR: u32 = 3_600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Active,
}

/// Outcome of [`RainfallEngine::import`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// The rainfall continues on this boot's clock
    Resumed,
    /// The rainfall ended while the device was down
    Ended,
    /// Empty, inconsistent, or superseded by tips of this boot
    Discarded,
    /// Nothing restored; retry once the boot epoch is set
    EpochUnknown,
}

/// Receiver of rainfall notifications.
///
/// Hooks carry no payload; read whatever is needed from the engine getters.
/// `on_rainfall_stop` runs before the reset, so the getters still describe
/// the rainfall that just ended.
pub trait RainfallSink {
    fn on_rainfall_start(&mut self, _engine: &RainfallEngine) {}
    fn on_rainfall_stop(&mut self, _engine: &RainfallEngine) {}
    fn on_rainfall_update(&mut self, _engine: &RainfallEngine) {}
}

/// Discards every notification.
impl RainfallSink for () {}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Rainfall {
    phase: Phase,
    volume: f32,
    duration: u32,
    rate: Option<f32>,
    intensity: Intensity,
}

/// Everything the query surface exposes, in one serializable record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainfallReport {
    pub phase: Phase,
    pub tips: u32,
    /// Millimeters
    pub volume: f32,
    /// Seconds
    pub duration: u32,
    /// Millimeters per hour
    pub rate: Option<f32>,
    /// Tips per hour
    pub tip_rate: Option<f32>,
    pub intensity: Intensity,
    pub gap_min: u32,
    pub gap_max: u32,
    pub gap_avg: u32,
    /// Epoch seconds
    pub first_tip: u64,
    /// Epoch seconds
    pub last_tip: u64,
}

pub struct RainfallEngine {
    capture: Arc<TipCapture>,
    bucket_factor: f32,
    offset_max_ms: Millis,
    start_tips: u32,
    stats: Statistics,
    rain: Rainfall,
    boot_epoch: Option<u64>,
}

impl RainfallEngine {
    pub fn new(config: &GaugeConfig) -> Self {
        Self::with_capture(config, Arc::new(TipCapture::new(config.debounce_ms)))
    }

    /// Build an engine around an existing capture, e.g. one already wired to
    /// an interrupt.
    pub fn with_capture(config: &GaugeConfig, capture: Arc<TipCapture>) -> Self {
        if config.start_tips < MIN_START_TIPS {
            warn!(
                "start_tips {} raised to {}",
                config.start_tips, MIN_START_TIPS
            );
        }
        Self {
            capture,
            bucket_factor: config.bucket_factor,
            offset_max_ms: config.offset_max_ms(),
            start_tips: config.start_tips.max(MIN_START_TIPS),
            stats: Statistics::new(),
            rain: Rainfall::default(),
            boot_epoch: None,
        }
    }

    /// Handle for the interrupt side.
    pub fn capture(&self) -> Arc<TipCapture> {
        Arc::clone(&self.capture)
    }

    /// Run one evaluation cycle at monotonic time `now`.
    pub fn measure<S: RainfallSink + ?Sized>(&mut self, now: Millis, sink: &mut S) {
        let batch = self.capture.take();
        if !batch.is_empty() {
            if batch.lost() > 0 {
                warn!("{} tips arrived without timestamps", batch.lost());
            }
            self.stats.record(
                &batch,
                self.capture.window_start(),
                self.boot_epoch.unwrap_or(0),
            );
            debug!("tips: {} new, {} in rain", batch.count, self.stats.count());

            if self.rain.phase == Phase::Idle && self.stats.count() >= self.start_tips {
                self.rain.phase = Phase::Active;
                self.evaluate();
                info!("Rainfall START ({} tips)", self.stats.count());
                sink.on_rainfall_start(self);
            }
        }

        if self.stats.count() > 0 {
            let silence = elapsed_since(now, self.stats.last_ms());
            if silence > self.offset_limit_ms() {
                match self.rain.phase {
                    Phase::Active => {
                        info!(
                            "Rainfall STOP: {:.2} mm in {} s after {} ms of silence",
                            self.rain.volume, self.rain.duration, silence
                        );
                        sink.on_rainfall_stop(self);
                    }
                    Phase::Idle => debug!("false start discarded"),
                }
                self.reset();
                return;
            }
        }

        if self.rain.phase == Phase::Active {
            self.evaluate();
            debug!(
                "volume {:.2} mm, duration {} s, rate {:?} mm/h, {}",
                self.rain.volume, self.rain.duration, self.rain.rate, self.rain.intensity
            );
            sink.on_rainfall_update(self);
        }
    }

    /// End the current rainfall now. Returns `false` when no rainfall was
    /// active, in which case nothing changes.
    pub fn stop<S: RainfallSink + ?Sized>(&mut self, sink: &mut S) -> bool {
        if self.rain.phase == Phase::Idle {
            return false;
        }
        info!("Rainfall STOP requested");
        sink.on_rainfall_stop(self);
        self.reset();
        true
    }

    fn evaluate(&mut self) {
        let count = self.stats.count();
        let duration = millis_to_secs(self.stats.span_ms());
        let rate = (duration > 0).then(|| {
            (count - 1) as f32 / duration as f32 * self.bucket_factor * SECS_PER_HOUR as f32
        });
        self.rain.volume = count as f32 * self.bucket_factor;
        self.rain.duration = duration;
        self.rain.rate = rate;
        self.rain.intensity = match rate {
            Some(rate) => Intensity::classify(rate, duration / SECS_PER_HOUR),
            None => Intensity::Unknown,
        };
    }

    fn reset(&mut self) {
        self.stats = Statistics::new();
        self.rain = Rainfall::default();
        self.capture.reopen_window();
    }

    /// Silence after the last tip that ends the current measurement.
    pub fn offset_limit_ms(&self) -> Millis {
        if self.stats.count() < 2 {
            self.offset_max_ms
        } else {
            self.stats
                .gap_max_ms()
                .saturating_mul(GAP_MULTIPLIER)
                .min(self.offset_max_ms)
        }
    }

    /// Record the absolute boot time. Only the first call has an effect.
    pub fn set_boot_epoch(&mut self, epoch: u64) -> bool {
        if self.boot_epoch.is_some() {
            return false;
        }
        self.boot_epoch = Some(epoch);
        self.stats.shift_epoch(epoch);
        info!("Boot epoch set to {}", epoch);
        true
    }

    pub fn boot_epoch(&self) -> Option<u64> {
        self.boot_epoch
    }

    /// Snapshot of the statistics for persistence.
    pub fn export(&self) -> StatisticsSnapshot {
        self.stats.export()
    }

    /// Resume a rainfall from a snapshot saved before a reboot, at
    /// monotonic time `now`.
    ///
    /// Snapshot times are epoch seconds, so nothing is restored until the
    /// boot epoch is known. A rainfall whose silence already exceeds its
    /// offset limit ended while the device was down: it is closed through
    /// `on_rainfall_stop` (when it had qualified) instead of being resumed.
    /// A resumed rainfall re-enters the active phase silently; its start
    /// notification was sent before the reboot.
    pub fn import<S: RainfallSink + ?Sized>(
        &mut self,
        snapshot: &StatisticsSnapshot,
        now: Millis,
        sink: &mut S,
    ) -> Resume {
        let Some(epoch) = self.boot_epoch else {
            return Resume::EpochUnknown;
        };
        if snapshot.tips == 0 {
            return Resume::Discarded;
        }
        if self.stats.count() > 0 {
            warn!(
                "Snapshot of {} tips ignored, this boot already measured {}",
                snapshot.tips,
                self.stats.count()
            );
            return Resume::Discarded;
        }
        let now_secs = epoch + u64::from(millis_to_secs(now));
        let Some(age_secs) = now_secs.checked_sub(snapshot.last_tip) else {
            warn!(
                "Snapshot last tip {} is ahead of the clock ({}), ignored",
                snapshot.last_tip, now_secs
            );
            return Resume::Discarded;
        };
        let age_ms = age_secs.saturating_mul(1_000);

        // Truncation only matters for a rainfall that is closed right away
        self.stats = Statistics::restore(snapshot, now.wrapping_sub(age_ms as Millis));
        self.rain = Rainfall::default();
        if self.stats.count() >= self.start_tips {
            self.rain.phase = Phase::Active;
            self.evaluate();
        }

        if age_ms > u64::from(self.offset_limit_ms()) {
            info!(
                "Snapshot of {} tips ended {} s ago, not resumed",
                self.stats.count(),
                age_secs
            );
            if self.rain.phase == Phase::Active {
                sink.on_rainfall_stop(self);
            }
            self.reset();
            return Resume::Ended;
        }

        info!(
            "Resumed {} tips, rainfall {}",
            self.stats.count(),
            if self.is_rain() { "active" } else { "idle" }
        );
        Resume::Resumed
    }

    pub fn phase(&self) -> Phase {
        self.rain.phase
    }

    pub fn is_rain(&self) -> bool {
        self.rain.phase == Phase::Active
    }

    /// Rain duration in seconds
    pub fn duration(&self) -> u32 {
        self.rain.duration
    }

    /// Rain volume in millimeters
    pub fn volume(&self) -> f32 {
        self.rain.volume
    }

    /// Rain rate in mm/h, `None` until it can be computed
    pub fn rate(&self) -> Option<f32> {
        self.rain.rate
    }

    /// Rain rate in tips per hour
    pub fn tip_rate(&self) -> Option<f32> {
        self.rain.rate.map(|rate| rate / self.bucket_factor)
    }

    pub fn intensity(&self) -> Intensity {
        self.rain.intensity
    }

    pub fn tips(&self) -> u32 {
        self.stats.count()
    }

    /// Shortest gap between tips in seconds
    pub fn gap_min(&self) -> u32 {
        millis_to_secs(self.stats.gap_min_ms())
    }

    /// Longest gap between tips in seconds
    pub fn gap_max(&self) -> u32 {
        millis_to_secs(self.stats.gap_max_ms())
    }

    /// Average gap between tips in seconds
    pub fn gap_avg(&self) -> u32 {
        millis_to_secs(self.stats.gap_avg_ms())
    }

    /// Time of the first tip in epoch seconds (boot relative until the boot
    /// epoch is set), 0 without tips
    pub fn first_tip(&self) -> u64 {
        self.stats.first_tip()
    }

    /// Time of the last tip in epoch seconds, 0 without tips
    pub fn last_tip(&self) -> u64 {
        self.stats.last_tip()
    }

    pub fn report(&self) -> RainfallReport {
        RainfallReport {
            phase: self.phase(),
            tips: self.tips(),
            volume: self.volume(),
            duration: self.duration(),
            rate: self.rate(),
            tip_rate: self.tip_rate(),
            intensity: self.intensity(),
            gap_min: self.gap_min(),
            gap_max: self.gap_max(),
            gap_avg: self.gap_avg(),
            first_tip: self.first_tip(),
            last_tip: self.last_tip(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records the order of notifications.
    #[derive(Default)]
    struct Recorder {
        events: Vec<&'static str>,
        volume_at_stop: Option<f32>,
    }

    impl RainfallSink for Recorder {
        fn on_rainfall_start(&mut self, _engine: &RainfallEngine) {
            self.events.push("start");
        }
        fn on_rainfall_stop(&mut self, engine: &RainfallEngine) {
            self.events.push("stop");
            self.volume_at_stop = Some(engine.volume());
        }
        fn on_rainfall_update(&mut self, _engine: &RainfallEngine) {
            self.events.push("update");
        }
    }

    fn engine() -> RainfallEngine {
        RainfallEngine::new(&GaugeConfig::default())
    }

    #[test]
    fn test_single_tip_stays_idle() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        engine.capture().on_interrupt(1_000);
        engine.measure(2_000, &mut sink);

        assert!(!engine.is_rain());
        assert_eq!(engine.tips(), 1);
        assert_eq!(engine.volume(), 0.0);
        assert_eq!(engine.intensity(), Intensity::None);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_second_tip_starts_rainfall() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        let capture = engine.capture();
        capture.on_interrupt(1_000);
        engine.measure(2_000, &mut sink);
        capture.on_interrupt(61_000);
        engine.measure(62_000, &mut sink);

        assert!(engine.is_rain());
        assert_eq!(sink.events, vec!["start", "update"]);
        assert_eq!(engine.duration(), 60);
        // One interval of 60 s: 60 tips/h
        let rate = engine.rate().unwrap();
        assert!((rate - 0.2794 * 60.0).abs() < 1e-3);
        assert!((engine.tip_rate().unwrap() - 60.0).abs() < 1e-3);
        assert_eq!(engine.intensity(), Intensity::Heavy);
    }

    #[test]
    fn test_update_fires_every_active_cycle() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(10_000);
        engine.measure(10_500, &mut sink);
        engine.measure(15_000, &mut sink);
        engine.measure(20_000, &mut sink);
        assert_eq!(sink.events, vec!["start", "update", "update", "update"]);
    }

    #[test]
    fn test_threshold_start_tips() {
        let config = GaugeConfig {
            start_tips: 3,
            ..GaugeConfig::default()
        };
        let mut engine = RainfallEngine::new(&config);
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(10_000);
        engine.measure(11_000, &mut ());
        assert!(!engine.is_rain());

        capture.on_interrupt(20_000);
        engine.measure(21_000, &mut ());
        assert!(engine.is_rain());
        assert_eq!(engine.tips(), 3);
    }

    #[test]
    fn test_start_tips_never_below_two() {
        let config = GaugeConfig {
            start_tips: 0,
            ..GaugeConfig::default()
        };
        let mut engine = RainfallEngine::new(&config);
        engine.capture().on_interrupt(0);
        engine.measure(100, &mut ());
        assert!(!engine.is_rain());
    }

    #[test]
    fn test_stop_sees_final_values_then_resets() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(10_000);
        engine.measure(10_000, &mut sink);

        // Max gap 10 s gives a 50 s offset limit
        engine.measure(60_001, &mut sink);
        assert_eq!(sink.events, vec!["start", "update", "stop"]);
        assert!((sink.volume_at_stop.unwrap() - 0.5588).abs() < 1e-4);
        assert!(!engine.is_rain());
        assert_eq!(engine.report(), RainfallEngine::new(&GaugeConfig::default()).report());
    }

    #[test]
    fn test_tip_newer_than_now_does_not_end_rain() {
        let mut engine = engine();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(1_000);
        engine.measure(1_000, &mut ());
        // Tip published after the caller sampled the clock
        capture.on_interrupt(2_000);
        engine.measure(1_900, &mut ());
        assert!(engine.is_rain());
        assert_eq!(engine.tips(), 3);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        engine.capture().on_interrupt(0);
        engine.measure(10, &mut sink);

        assert!(!engine.stop(&mut sink));
        assert!(sink.events.is_empty());
        assert_eq!(engine.tips(), 1);
    }

    #[test]
    fn test_manual_stop() {
        let mut engine = engine();
        let mut sink = Recorder::default();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(5_000);
        engine.measure(5_000, &mut sink);

        assert!(engine.stop(&mut sink));
        assert_eq!(sink.events, vec!["start", "update", "stop"]);
        assert_eq!(engine.tips(), 0);
        assert!(!engine.stop(&mut sink));
    }

    #[test]
    fn test_new_window_after_reset() {
        let mut engine = engine();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(5_000);
        engine.measure(5_000, &mut ());
        engine.measure(5_000 + 25_001, &mut ());
        assert!(!engine.is_rain());
        assert_eq!(capture.window_start(), None);

        capture.on_interrupt(100_000);
        engine.measure(100_000, &mut ());
        assert_eq!(capture.window_start(), Some(100_000));
        assert_eq!(engine.tips(), 1);
    }

    /// Three tips at 0, 20 and 40 s of a boot at 1_750_000_000.
    fn saved_rainfall() -> StatisticsSnapshot {
        let mut source = engine();
        source.set_boot_epoch(1_750_000_000);
        let capture = source.capture();
        for t in [0, 20_000, 40_000] {
            capture.on_interrupt(t);
        }
        source.measure(40_000, &mut ());
        source.export()
    }

    #[test]
    fn test_import_resumes_active_rainfall() {
        let snapshot = saved_rainfall();
        assert_eq!(snapshot.last_tip, 1_750_000_040);

        let mut sink = Recorder::default();
        let mut resumed = engine();
        // Booted 60 s after the last tip
        resumed.set_boot_epoch(1_750_000_100);
        assert_eq!(resumed.import(&snapshot, 0, &mut sink), Resume::Resumed);
        assert!(resumed.is_rain());
        assert_eq!(resumed.tips(), 3);
        assert_eq!(resumed.duration(), 40);
        assert_eq!(resumed.gap_max(), 20);
        assert!(sink.events.is_empty());

        resumed.capture().on_interrupt(30_000);
        resumed.measure(30_000, &mut sink);
        assert_eq!(sink.events, vec!["update"]);
        assert_eq!(resumed.tips(), 4);
        assert_eq!(resumed.duration(), 130);
        assert_eq!(resumed.gap_max(), 90);
        assert_eq!(resumed.last_tip(), 1_750_000_130);
    }

    #[test]
    fn test_import_waits_for_boot_epoch() {
        let snapshot = saved_rainfall();
        let mut sink = Recorder::default();
        let mut resumed = engine();

        assert_eq!(resumed.import(&snapshot, 0, &mut sink), Resume::EpochUnknown);
        assert!(!resumed.is_rain());
        assert_eq!(resumed.tips(), 0);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_import_closes_rainfall_that_ended_while_down() {
        let snapshot = saved_rainfall();
        let mut sink = Recorder::default();
        let mut resumed = engine();
        // Powered off for 30 days
        resumed.set_boot_epoch(snapshot.last_tip + 30 * 86_400);

        assert_eq!(resumed.import(&snapshot, 5_000, &mut sink), Resume::Ended);
        assert_eq!(sink.events, vec!["stop"]);
        assert!((sink.volume_at_stop.unwrap() - 3.0 * 0.2794).abs() < 1e-4);
        assert!(!resumed.is_rain());
        assert_eq!(resumed.tips(), 0);

        // The next tip belongs to a new event
        resumed.capture().on_interrupt(60_000);
        resumed.measure(60_000, &mut sink);
        assert_eq!(resumed.tips(), 1);
        assert_eq!(resumed.gap_max(), 0);
        assert_eq!(resumed.first_tip(), snapshot.last_tip + 30 * 86_400 + 60);
    }

    #[test]
    fn test_import_ends_just_past_offset_limit() {
        let snapshot = saved_rainfall();
        // Max gap 20 s gives a 100 s limit
        let mut resumed = engine();
        resumed.set_boot_epoch(snapshot.last_tip + 100);
        assert_eq!(resumed.import(&snapshot, 0, &mut ()), Resume::Resumed);

        let mut resumed = engine();
        resumed.set_boot_epoch(snapshot.last_tip + 101);
        assert_eq!(resumed.import(&snapshot, 0, &mut ()), Resume::Ended);
    }

    #[test]
    fn test_import_discards_false_start_silently() {
        let mut source = engine();
        source.set_boot_epoch(1_750_000_000);
        source.capture().on_interrupt(1_000);
        source.measure(1_000, &mut ());
        let snapshot = source.export();

        let mut sink = Recorder::default();
        let mut resumed = engine();
        resumed.set_boot_epoch(1_750_001_000);
        assert_eq!(resumed.import(&snapshot, 0, &mut sink), Resume::Ended);
        assert!(sink.events.is_empty());
        assert_eq!(resumed.tips(), 0);
    }

    #[test]
    fn test_import_does_not_replace_current_tips() {
        let snapshot = saved_rainfall();
        let mut resumed = engine();
        resumed.capture().on_interrupt(0);
        resumed.measure(0, &mut ());
        resumed.set_boot_epoch(snapshot.last_tip + 10);

        assert_eq!(resumed.import(&snapshot, 1_000, &mut ()), Resume::Discarded);
        assert_eq!(resumed.tips(), 1);
    }

    #[test]
    fn test_import_rejects_snapshot_from_the_future() {
        let snapshot = saved_rainfall();
        let mut resumed = engine();
        resumed.set_boot_epoch(snapshot.last_tip - 500);
        assert_eq!(resumed.import(&snapshot, 0, &mut ()), Resume::Discarded);
        assert_eq!(resumed.tips(), 0);
    }

    #[test]
    fn test_ring_overflow_before_first_cycle() {
        use crate::capture::TIP_RING;

        let mut engine = engine();
        let capture = engine.capture();
        let total = TIP_RING as u32 + 5;
        for i in 0..total {
            capture.on_interrupt(i * 1_000);
        }
        let last = (total - 1) * 1_000;
        engine.measure(last, &mut ());

        assert!(engine.is_rain());
        assert_eq!(engine.tips(), total);
        // Measured from the window start, not the oldest kept timestamp
        assert_eq!(engine.duration(), total - 1);
        assert_eq!(engine.first_tip(), 0);
        assert_eq!(engine.last_tip(), u64::from(total - 1));
        assert_eq!((engine.gap_min(), engine.gap_max(), engine.gap_avg()), (1, 1, 1));
        assert!((engine.volume() - total as f32 * 0.2794).abs() < 1e-3);
    }

    #[test]
    fn test_report_serializes() {
        let mut engine = engine();
        let capture = engine.capture();
        capture.on_interrupt(0);
        capture.on_interrupt(30_000);
        engine.measure(30_000, &mut ());

        let json = serde_json::to_value(engine.report()).unwrap();
        assert_eq!(json["phase"], "active");
        assert_eq!(json["tips"], 2);
        assert_eq!(json["duration"], 30);
        assert_eq!(json["intensity"], "intense");
    }
}
