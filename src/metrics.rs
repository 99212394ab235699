//! Session metrics fed by the worker loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counter, e.g. bytes moved on the wire.
#[derive(Debug, Default)]
pub struct Meter {
    total: AtomicU64,
}

impl Meter {
    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Per-block processing-time statistic.
#[derive(Debug, Default)]
pub struct DurationStat {
    last_us: AtomicU64,
    max_us: AtomicU64,
    blocks: AtomicU64,
}

/// Snapshot of a [`DurationStat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationMetrics {
    pub last_us: u64,
    pub max_us: u64,
    pub blocks: u64,
}

impl DurationStat {
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.last_us.store(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DurationMetrics {
        DurationMetrics {
            last_us: self.last_us.load(Ordering::Relaxed),
            max_us: self.max_us.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.last_us.store(0, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
    }
}

/// The per-session metrics the worker maintains.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub bytes_in: Meter,
    pub bytes_out: Meter,
    pub block_time: DurationStat,
}
