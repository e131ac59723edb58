//! Fixed-size uniform reservoir and its sorted snapshot.
//!
//! The reservoir keeps a uniform random sample of everything it has seen
//! (Vitter's Algorithm R). Memory is bounded by `capacity` no matter how
//! many values stream through.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A bounded, uniformly sampled set of integer values.
#[derive(Debug, Clone)]
pub struct UniformReservoir {
    values: Vec<i64>,
    capacity: usize,
    /// Total values offered, including those not retained.
    count: u64,
    rng: StdRng,
}

impl UniformReservoir {
    /// Default sample size; keeps quantile error around 5% at 99.9% confidence.
    pub const DEFAULT_CAPACITY: usize = 1028;

    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic reservoir for tests and replay.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: Vec::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
            count: 0,
            rng,
        }
    }

    /// Offer a value to the reservoir.
    pub fn update(&mut self, value: i64) {
        self.count += 1;
        if self.values.len() < self.capacity {
            self.values.push(value);
            return;
        }
        let slot = self.rng.gen_range(0..self.count);
        if slot < self.capacity as u64 {
            self.values[slot as usize] = value;
        }
    }

    /// Number of values currently retained.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values ever offered.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy out the retained values, sorted.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.values.clone())
    }
}

/// An immutable, sorted view of a reservoir.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    values: Vec<i64>,
}

impl Snapshot {
    pub fn new(mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { values }
    }

    /// Interpolated quantile. `quantile` must lie in `[0, 1]`.
    ///
    /// Uses the `(n + 1)` position rule: `pos = q * (n + 1)`, clamped to the
    /// first and last sample, linearly interpolated in between.
    pub fn value(&self, quantile: f64) -> f64 {
        let q = quantile.clamp(0.0, 1.0);
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }

        let pos = q * (n as f64 + 1.0);
        let index = pos as usize;

        if index < 1 {
            return self.values[0] as f64;
        }
        if index >= n {
            return self.values[n - 1] as f64;
        }

        let lower = self.values[index - 1] as f64;
        let upper = self.values[index] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn median(&self) -> f64 {
        self.value(0.5)
    }

    pub fn percentile_75(&self) -> f64 {
        self.value(0.75)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: i128 = self.values.iter().map(|&v| v as i128).sum();
        sum as f64 / self.values.len() as f64
    }

    pub fn min(&self) -> Option<i64> {
        self.values.first().copied()
    }

    pub fn max(&self) -> Option<i64> {
        self.values.last().copied()
    }

    /// Sorted sample values.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_everything_below_capacity() {
        let mut r = UniformReservoir::with_seed(10, 7);
        for v in 1..=5 {
            r.update(v);
        }
        assert_eq!(r.len(), 5);
        assert_eq!(r.count(), 5);
        assert_eq!(r.snapshot().values(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn memory_is_bounded() {
        let mut r = UniformReservoir::with_seed(100, 7);
        for v in 0..100_000 {
            r.update(v);
        }
        assert_eq!(r.len(), 100);
        assert_eq!(r.count(), 100_000);
    }

    #[test]
    fn sample_stays_roughly_uniform() {
        let mut r = UniformReservoir::with_seed(1000, 42);
        for v in 0..100_000 {
            r.update(v);
        }
        // A uniform sample of 0..100k has its median near 50k.
        let median = r.snapshot().median();
        assert!(median > 40_000.0 && median < 60_000.0, "median was {median}");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut r = UniformReservoir::new(0);
        r.update(3);
        assert_eq!(r.capacity(), 1);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn empty_snapshot_is_zero() {
        let s = Snapshot::new(Vec::new());
        assert_eq!(s.value(0.5), 0.0);
        assert_eq!(s.mean(), 0.0);
        assert!(s.min().is_none());
    }

    #[test]
    fn quantile_interpolates() {
        // pos = 0.75 * 5 = 3.75 → 30 + 0.75 * (40 - 30)
        let s = Snapshot::new(vec![40, 10, 30, 20]);
        assert_eq!(s.percentile_75(), 37.5);
        // pos = 0.5 * 5 = 2.5 → 20 + 0.5 * (30 - 20)
        assert_eq!(s.median(), 25.0);
        assert_eq!(s.mean(), 25.0);
    }

    #[test]
    fn quantile_clamps_to_ends() {
        let s = Snapshot::new(vec![5, 9]);
        // pos = 0.25 * 3 = 0.75 → first sample.
        assert_eq!(s.value(0.25), 5.0);
        // pos = 0.75 * 3 = 2.25 → last sample.
        assert_eq!(s.value(0.75), 9.0);
        assert_eq!(s.value(0.0), 5.0);
        assert_eq!(s.value(1.0), 9.0);
    }

    #[test]
    fn single_value_snapshot() {
        let s = Snapshot::new(vec![42]);
        assert_eq!(s.median(), 42.0);
        assert_eq!(s.percentile_75(), 42.0);
        assert_eq!(s.mean(), 42.0);
    }
}
