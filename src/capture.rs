//! # Tip Capture
//!
//! Interrupt-side half of the gauge. Every falling edge of the bucket's reed
//! switch ends up in [`TipCapture::on_interrupt`], which filters contact
//! bounce and publishes the accepted tip to the main loop.
//!
//! ## Sharing Across the Interrupt Boundary
//!
//! There is exactly one writer per field:
//!
//! | Field           | Written by      | Read by            |
//! |-----------------|-----------------|--------------------|
//! | `last_accepted` | interrupt       | interrupt, engine  |
//! | `window_start`  | interrupt       | engine             |
//! | `ring`, `head`  | interrupt       | engine             |
//! | `pending`       | both (add/sub)  | engine             |
//! | `tail`          | engine          | engine             |
//! | `window_open`   | both (flag)     | interrupt          |
//!
//! Everything is a word-sized atomic, so no lock is needed and the interrupt
//! path is a handful of loads and stores. The engine consumes with the
//! optimistic decrement pattern: it reads `pending`, drains that many
//! timestamps, then subtracts exactly what it read. A tip landing in the
//! middle of that sequence stays pending for the next cycle.

use crate::Millis;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use heapless::Vec;

/// Number of timestamp slots between two main-loop cycles.
///
/// With the default 300 ms debounce and a ~5 s measurement period at most
/// 17 tips can land per cycle, so 32 leaves headroom for a stalled loop.
pub const TIP_RING: usize = 32;

/// Tips drained from the capture in one main-loop cycle.
#[derive(Debug, Clone, Default)]
pub struct TipBatch {
    /// Number of tips accepted since the previous cycle.
    pub count: u32,
    /// Timestamps of the most recent tips, oldest first.
    ///
    /// Shorter than `count` only if the ring overflowed.
    pub timestamps: Vec<Millis, TIP_RING>,
}

impl TipBatch {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Tips that were counted but whose timestamps were overwritten.
    pub fn lost(&self) -> u32 {
        self.count - self.timestamps.len() as u32
    }
}

/// Debounced, lock-free tip counter shared between interrupt and main loop.
pub struct TipCapture {
    debounce_ms: Millis,
    accepted_any: AtomicBool,
    last_accepted: AtomicU32,
    window_open: AtomicBool,
    window_start: AtomicU32,
    pending: AtomicU32,
    head: AtomicU32,
    tail: AtomicU32,
    ring: [AtomicU32; TIP_RING],
}

impl TipCapture {
    pub fn new(debounce_ms: Millis) -> Self {
        Self {
            debounce_ms,
            accepted_any: AtomicBool::new(false),
            last_accepted: AtomicU32::new(0),
            window_open: AtomicBool::new(true),
            window_start: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            ring: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub fn debounce_ms(&self) -> Millis {
        self.debounce_ms
    }

    /// Register a tip observed at `now`. Called from interrupt context.
    ///
    /// Returns `false` when the edge was suppressed as contact bounce.
    pub fn on_interrupt(&self, now: Millis) -> bool {
        if self.accepted_any.load(Ordering::Relaxed)
            && now.wrapping_sub(self.last_accepted.load(Ordering::Relaxed)) < self.debounce_ms
        {
            return false;
        }

        let head = self.head.load(Ordering::Relaxed);
        self.ring[head as usize % TIP_RING].store(now, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Relaxed);
        self.last_accepted.store(now, Ordering::Relaxed);
        self.accepted_any.store(true, Ordering::Relaxed);
        if self.window_open.swap(false, Ordering::Relaxed) {
            self.window_start.store(now, Ordering::Relaxed);
        }
        // Publishing last makes every store above visible to the consumer.
        self.pending.fetch_add(1, Ordering::Release);
        true
    }

    /// Tips accepted but not yet consumed by the main loop.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Timestamp of the most recently accepted tip.
    pub fn last_accepted(&self) -> Option<Millis> {
        self.accepted_any
            .load(Ordering::Acquire)
            .then(|| self.last_accepted.load(Ordering::Acquire))
    }

    /// Provisional rain start: first tip accepted since the window reopened.
    pub fn window_start(&self) -> Option<Millis> {
        if self.window_open.load(Ordering::Acquire) {
            None
        } else {
            Some(self.window_start.load(Ordering::Acquire))
        }
    }

    /// Mark the next accepted tip as the start of a fresh measurement window.
    pub fn reopen_window(&self) {
        self.window_open.store(true, Ordering::Release);
    }

    /// Drain every tip published so far.
    pub fn take(&self) -> TipBatch {
        self.consume(self.pending())
    }

    /// Drain exactly `count` published tips.
    ///
    /// `count` must not exceed a value previously returned by
    /// [`pending`](Self::pending); anything published afterwards is left
    /// untouched for the next call.
    pub fn consume(&self, count: u32) -> TipBatch {
        let mut batch = TipBatch {
            count,
            timestamps: Vec::new(),
        };
        if count == 0 {
            return batch;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let kept = count.min(TIP_RING as u32);
        let first = tail.wrapping_add(count - kept);
        for i in 0..kept {
            let slot = first.wrapping_add(i) as usize % TIP_RING;
            // Capacity equals TIP_RING and kept never exceeds it.
            let _ = batch
                .timestamps
                .push(self.ring[slot].load(Ordering::Relaxed));
        }
        self.tail.store(tail.wrapping_add(count), Ordering::Relaxed);
        self.pending.fetch_sub(count, Ordering::AcqRel);
        batch
    }
}
