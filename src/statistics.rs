//! # Rainfall Statistics
//!
//! Running statistics of the tips of the current rainfall: how many, when
//! the first and last one fell, and the spread of the gaps between them.
//! The accumulator lives for exactly one rainfall and is reset by the engine
//! when the rainfall ends (or turns out to be a false start).
//!
//! Tip times are kept twice:
//! - as monotonic [`Millis`] for gap and duration arithmetic, always with
//!   wrapping subtraction
//! - as device epoch seconds for reporting, relative to boot until the boot
//!   epoch becomes known (see [`Statistics::shift_epoch`])

use crate::capture::TipBatch;
use crate::{millis_to_secs, Millis};
use serde::{Deserialize, Serialize};

/// Portable record of the accumulator, used to resume a rainfall after a
/// reboot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub tips: u32,
    /// Epoch seconds of the first tip
    pub first_tip: u64,
    /// Epoch seconds of the last tip
    pub last_tip: u64,
    pub gap_min_ms: Millis,
    pub gap_max_ms: Millis,
    pub gap_sum_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    count: u32,
    first_ms: Millis,
    last_ms: Millis,
    first_tip: u64,
    last_tip: u64,
    gap_min: Millis,
    gap_max: Millis,
    gap_sum: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a batch of freshly captured tips into the statistics.
    ///
    /// `window_start` is the capture's provisional rain start, used to place
    /// the first tip of a rainfall when the ring overflowed before the first
    /// cycle. `epoch` is the boot epoch in seconds (0 while unknown).
    pub fn record(&mut self, batch: &TipBatch, window_start: Option<Millis>, epoch: u64) {
        let Some(&oldest) = batch.timestamps.first() else {
            return;
        };

        let lost = batch.lost();
        if lost > 0 {
            if self.count > 0 {
                // Lost tips plus the oldest kept one close `lost + 1` gaps
                self.spread_gaps(oldest.wrapping_sub(self.last_ms), lost + 1);
                self.count += lost;
                self.last_ms = oldest;
                self.last_tip = self.tip_epoch(oldest);
                self.count += 1;
            } else if let Some(start) = window_start {
                // The window start is itself one of the lost tips
                self.open(start, epoch);
                self.spread_gaps(oldest.wrapping_sub(start), lost);
                self.count = lost;
                self.last_ms = oldest;
                self.last_tip = self.tip_epoch(oldest);
                self.count += 1;
            } else {
                self.open(oldest, epoch);
                self.count = lost + 1;
            }
        } else {
            self.push(oldest, epoch);
        }

        for &tip in batch.timestamps.iter().skip(1) {
            self.push(tip, epoch);
        }
    }

    fn open(&mut self, tip: Millis, epoch: u64) {
        self.first_ms = tip;
        self.last_ms = tip;
        self.first_tip = epoch + u64::from(millis_to_secs(tip));
        self.last_tip = self.first_tip;
    }

    fn push(&mut self, tip: Millis, epoch: u64) {
        if self.count == 0 {
            self.open(tip, epoch);
        } else {
            self.add_gap(tip.wrapping_sub(self.last_ms));
            self.last_ms = tip;
            self.last_tip = self.tip_epoch(tip);
        }
        self.count += 1;
    }

    /// Last tip time is derived from the first one so that it stays correct
    /// across a wrap of the millisecond clock.
    fn tip_epoch(&self, tip: Millis) -> u64 {
        self.first_tip + u64::from(millis_to_secs(tip.wrapping_sub(self.first_ms)))
    }

    fn add_gap(&mut self, gap: Millis) {
        if self.count < 2 {
            self.gap_min = gap;
            self.gap_max = gap;
        } else {
            self.gap_min = self.gap_min.min(gap);
            self.gap_max = self.gap_max.max(gap);
        }
        self.gap_sum += u64::from(gap);
    }

    /// Spread `span` evenly over `gaps` unobserved intervals.
    fn spread_gaps(&mut self, span: Millis, gaps: u32) {
        if gaps == 0 {
            return;
        }
        let gap = span / gaps;
        if self.count < 2 {
            self.gap_min = gap;
            self.gap_max = gap;
        } else {
            self.gap_min = self.gap_min.min(gap);
            self.gap_max = self.gap_max.max(gap);
        }
        self.gap_sum += u64::from(span);
    }

    /// Move reported tip times from boot-relative to absolute seconds.
    pub fn shift_epoch(&mut self, epoch: u64) {
        if self.count > 0 {
            self.first_tip += epoch;
            self.last_tip += epoch;
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_ms(&self) -> Millis {
        self.last_ms
    }

    /// Milliseconds spanned by the tips, first to last.
    pub fn span_ms(&self) -> Millis {
        if self.count < 2 {
            0
        } else {
            self.last_ms.wrapping_sub(self.first_ms)
        }
    }

    pub fn first_tip(&self) -> u64 {
        self.first_tip
    }

    pub fn last_tip(&self) -> u64 {
        self.last_tip
    }

    pub fn gap_min_ms(&self) -> Millis {
        self.gap_min
    }

    pub fn gap_max_ms(&self) -> Millis {
        self.gap_max
    }

    pub fn gap_avg_ms(&self) -> Millis {
        if self.count < 2 {
            0
        } else {
            (self.gap_sum / u64::from(self.count - 1)) as Millis
        }
    }

    pub fn export(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tips: self.count,
            first_tip: self.first_tip,
            last_tip: self.last_tip,
            gap_min_ms: self.gap_min,
            gap_max_ms: self.gap_max,
            gap_sum_ms: self.gap_sum,
        }
    }

    /// Rebuild the accumulator from a snapshot.
    ///
    /// `last_ms` places the snapshot's last tip on this boot's millisecond
    /// clock; the first tip follows from the recorded span. A tip from
    /// before this boot sits at a "negative" time, which the wrapping
    /// arithmetic handles like any other.
    pub fn restore(snapshot: &StatisticsSnapshot, last_ms: Millis) -> Self {
        if snapshot.tips == 0 {
            return Self::default();
        }
        let span_ms = snapshot
            .last_tip
            .saturating_sub(snapshot.first_tip)
            .saturating_mul(1_000)
            .min(u64::from(Millis::MAX)) as Millis;
        let (gap_min, gap_max, gap_sum) = if snapshot.tips < 2 {
            (0, 0, 0)
        } else {
            (snapshot.gap_min_ms, snapshot.gap_max_ms, snapshot.gap_sum_ms)
        };
        Self {
            count: snapshot.tips,
            first_ms: last_ms.wrapping_sub(span_ms),
            last_ms,
            first_tip: snapshot.first_tip,
            last_tip: snapshot.last_tip,
            gap_min,
            gap_max,
            gap_sum,
        }
    }
}
