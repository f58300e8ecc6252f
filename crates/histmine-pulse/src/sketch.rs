//! K-minimum-values theta sketch.
//!
//! Keeps the `k` smallest 64-bit hashes seen. Below `k` distinct values the
//! sketch is exact; beyond that the `k`-th smallest hash (theta) gives an
//! unbiased cardinality estimate, and two sketches can be intersected by
//! comparing their retained hashes below the smaller theta.

use std::collections::BTreeSet;

/// Bounded set of the smallest hashes observed.
///
/// # Examples
///
/// ```
/// use histmine_pulse::sketch::ThetaSketch;
///
/// let mut a = ThetaSketch::new(64);
/// let mut b = ThetaSketch::new(64);
/// for h in 0..10u64 {
///     a.update(h * 7919);
/// }
/// for h in 5..20u64 {
///     b.update(h * 7919);
/// }
/// assert_eq!(a.estimate(), 10.0);
/// assert_eq!(a.intersection_estimate(&b), 5.0);
/// ```
#[derive(Debug, Clone)]
pub struct ThetaSketch {
    capacity: usize,
    hashes: BTreeSet<u64>,
}

impl ThetaSketch {
    /// New sketch retaining at most `capacity` hashes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            hashes: BTreeSet::new(),
        }
    }

    /// Offer one hash.
    pub fn update(&mut self, hash: u64) {
        if self.hashes.len() >= self.capacity {
            match self.hashes.last() {
                Some(max) if hash >= *max => return,
                _ => {}
            }
        }
        self.hashes.insert(hash);
        if self.hashes.len() > self.capacity {
            self.hashes.pop_last();
        }
    }

    /// Number of retained hashes.
    pub fn retained(&self) -> usize {
        self.hashes.len()
    }

    /// True when no hash was ever offered.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Sampling threshold, or `None` while the sketch is still exact.
    pub fn theta(&self) -> Option<u64> {
        if self.hashes.len() < self.capacity {
            None
        } else {
            self.hashes.last().copied()
        }
    }

    /// Estimated number of distinct hashes offered.
    pub fn estimate(&self) -> f64 {
        match self.theta() {
            None => self.hashes.len() as f64,
            Some(theta) => (self.hashes.len() as f64 - 1.0) / fraction(theta),
        }
    }

    /// Estimated size of the intersection with `other`.
    pub fn intersection_estimate(&self, other: &ThetaSketch) -> f64 {
        match (self.theta(), other.theta()) {
            (None, None) => self.hashes.intersection(&other.hashes).count() as f64,
            (a, b) => {
                let theta = a.unwrap_or(u64::MAX).min(b.unwrap_or(u64::MAX));
                let common = self
                    .hashes
                    .range(..theta)
                    .filter(|h| other.hashes.contains(h))
                    .count();
                common as f64 / fraction(theta)
            }
        }
    }
}

fn fraction(theta: u64) -> f64 {
    (theta as f64 / u64::MAX as f64).max(f64::MIN_POSITIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    // splitmix64, for well-spread test hashes
    fn mix(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = x;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[test]
    fn small_sets_are_exact() {
        let mut sketch = ThetaSketch::new(16);
        for i in 0..10 {
            sketch.update(mix(i));
            sketch.update(mix(i));
        }
        assert!(sketch.theta().is_none());
        assert_eq!(sketch.estimate(), 10.0);
    }

    #[test]
    fn retains_at_most_capacity() {
        let mut sketch = ThetaSketch::new(32);
        for i in 0..1000 {
            sketch.update(mix(i));
        }
        assert_eq!(sketch.retained(), 32);
        assert!(sketch.theta().is_some());
    }

    #[test]
    fn large_estimate_is_close() {
        let mut sketch = ThetaSketch::new(1024);
        for i in 0..20_000 {
            sketch.update(mix(i));
        }
        let estimate = sketch.estimate();
        assert!((estimate - 20_000.0).abs() / 20_000.0 < 0.15, "estimate {estimate}");
    }

    #[test]
    fn large_intersection_is_close() {
        let mut a = ThetaSketch::new(1024);
        let mut b = ThetaSketch::new(1024);
        for i in 0..20_000 {
            a.update(mix(i));
        }
        for i in 10_000..30_000 {
            b.update(mix(i));
        }
        let estimate = a.intersection_estimate(&b);
        assert!((estimate - 10_000.0).abs() / 10_000.0 < 0.2, "estimate {estimate}");
    }

    #[test]
    fn disjoint_sketches_do_not_intersect() {
        let mut a = ThetaSketch::new(8);
        let mut b = ThetaSketch::new(8);
        a.update(1);
        b.update(2);
        assert_eq!(a.intersection_estimate(&b), 0.0);
        assert!(ThetaSketch::new(8).is_empty());
    }
}
