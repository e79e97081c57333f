//! Latency histogram with atomic buckets.

use std::sync::atomic::{AtomicU64, Ordering};

/// Standard latency buckets in seconds, 5ms to 10s.
pub const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// A cumulative histogram over [`DURATION_BUCKETS`].
#[derive(Debug)]
pub struct Histogram {
    /// Per-bucket observation counts (non-cumulative; summed at render).
    buckets: [AtomicU64; DURATION_BUCKETS.len()],
    /// Observations above the largest bucket.
    overflow: AtomicU64,
    /// Total of observed values in microseconds.
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            overflow: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation in seconds.
    pub fn observe(&self, seconds: f64) {
        let seconds = seconds.max(0.0);
        match DURATION_BUCKETS.iter().position(|bound| seconds <= *bound) {
            Some(index) => self.buckets[index].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Cumulative count at and below each bucket bound, plus the +Inf
    /// total.
    pub fn cumulative(&self) -> (Vec<(f64, u64)>, u64) {
        let mut running = 0;
        let mut out = Vec::with_capacity(DURATION_BUCKETS.len());
        for (index, bound) in DURATION_BUCKETS.iter().enumerate() {
            running += self.buckets[index].load(Ordering::Relaxed);
            out.push((*bound, running));
        }
        (out, running + self.overflow.load(Ordering::Relaxed))
    }
}
