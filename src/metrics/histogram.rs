use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

use super::buckets::{BUCKET_COUNT, TIMING_BUCKETS};

/// Streaming histogram over the fixed bucket table.
///
/// `measurements[i]` counts observations strictly below `TIMING_BUCKETS[i]`
/// — cumulative counts, not per-bucket — which keeps two histograms exactly
/// subtractable cell-by-cell. Snapshot range queries depend on that: a time
/// window is answered as the difference of two persisted histograms.
///
/// Subtraction assumes the subtrahend observed a prefix of the minuend's
/// stream; negative results are a caller bug, not a recoverable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    measurements: Vec<u64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            measurements: vec![0; BUCKET_COUNT],
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of `x` microseconds.
    pub fn observe(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
        // Every cumulative cell whose boundary exceeds x counts it.
        let first_above = TIMING_BUCKETS.partition_point(|&boundary| boundary <= x);
        for cell in &mut self.measurements[first_above..] {
            *cell += 1;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// NaN when empty.
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Population standard deviation; NaN when empty. Subtraction can leave
    /// the variance a hair below zero in floating point, so it is clamped
    /// before the square root.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let variance = self.sum_sq / n - (self.sum / n).powi(2);
        variance.max(0.0).sqrt()
    }

    pub fn median(&self) -> f64 {
        self.quantile(0.5)
    }

    /// Value below which a fraction `q` of observations fall, linearly
    /// interpolated between the bracketing bucket boundaries. Callers must
    /// check `count` first; the quantile of an empty histogram is undefined.
    pub fn quantile(&self, q: f64) -> f64 {
        let c = q * self.count as f64;
        for (i, &cell) in self.measurements.iter().enumerate() {
            let observations = cell as f64;
            if observations > c || (q == 1.0 && observations == c) {
                // The c'th observation landed in this bucket.
                if i == 0 {
                    return TIMING_BUCKETS[0];
                }
                let previous = self.measurements[i - 1] as f64;
                let x = (c - previous) / (observations - previous);
                return x * TIMING_BUCKETS[i] + (1.0 - x) * TIMING_BUCKETS[i - 1];
            }
        }
        TIMING_BUCKETS[BUCKET_COUNT - 1]
    }
}

impl AddAssign<&Stats> for Stats {
    fn add_assign(&mut self, other: &Stats) {
        for (cell, addend) in self.measurements.iter_mut().zip(&other.measurements) {
            *cell += addend;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }
}

impl Add<&Stats> for &Stats {
    type Output = Stats;

    fn add(self, other: &Stats) -> Stats {
        let mut result = self.clone();
        result += other;
        result
    }
}

impl Sub<&Stats> for &Stats {
    type Output = Stats;

    fn sub(self, other: &Stats) -> Stats {
        Stats {
            measurements: self
                .measurements
                .iter()
                .zip(&other.measurements)
                .map(|(a, b)| a - b)
                .collect(),
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }
}
