//! Bounded history: recency-biased capacity downsampling.
//!
//! When a series grows past the cap `N`, the most recent `R = floor(N * f)`
//! samples are kept verbatim and the older part is thinned to `N - R` samples
//! by nearest-index picks at evenly spaced positions. The policy runs every
//! time the cap is exceeded, so old history coarsens progressively while the
//! window a user is watching stays at full resolution.

use crate::sample::Sample;

/// Reference cap, family-independent.
pub const DEFAULT_MAX_SAMPLES: usize = 600;
/// Reference share of the cap kept at full resolution.
pub const DEFAULT_RECENT_FRACTION: f64 = 0.2;

/// Cap and recent-window size of a retained series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapPolicy {
    cap: usize,
    recent: usize,
}

impl Default for CapPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES, DEFAULT_RECENT_FRACTION)
    }
}

impl CapPolicy {
    /// `cap` is raised to at least 1 so a series always holds its newest
    /// sample. `recent_fraction` is clamped into `[0, 1)`; the recent window
    /// is always strictly smaller than the cap.
    pub fn new(cap: usize, recent_fraction: f64) -> Self {
        let cap = cap.max(1);
        let fraction = if recent_fraction.is_finite() {
            recent_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let recent = ((cap as f64) * fraction).floor() as usize;
        Self {
            cap,
            recent: recent.min(cap.saturating_sub(1)),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Samples kept untouched at the recent end (`R`).
    pub fn recent_slots(&self) -> usize {
        self.recent
    }

    /// Samples the older portion is thinned to (`N - R`).
    pub fn older_slots(&self) -> usize {
        self.cap - self.recent
    }

    /// Return `samples` unchanged when within the cap, otherwise the
    /// downsampled sequence (older picks followed by the recent window).
    pub fn enforce<S: Sample>(&self, samples: Vec<S>) -> Vec<S> {
        if samples.len() <= self.cap {
            return samples;
        }
        let split = samples.len() - self.recent;
        let older = &samples[..split];
        let recent = &samples[split..];
        let target = self.older_slots();
        // older.len() > target here because samples.len() > cap.
        let step = older.len() as f64 / target as f64;

        let mut out = Vec::with_capacity(self.cap);
        for i in 0..target {
            let idx = ((i as f64) * step).floor() as usize;
            out.push(older[idx.min(older.len() - 1)].clone());
        }
        out.extend_from_slice(recent);

        // With R == 0 the newest sample sits in `older` and may not be picked.
        if self.recent == 0 {
            if let (Some(newest), Some(last)) = (samples.last(), out.last_mut()) {
                if last.timestamp() != newest.timestamp() {
                    *last = newest.clone();
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::load;
    use crate::sample::LoadSample;
    use crate::sequence::is_strictly_increasing;
    use proptest::prelude::*;

    fn series(range: std::ops::RangeInclusive<i64>) -> Vec<LoadSample> {
        range.map(|t| load(t, t as f64)).collect()
    }

    fn ts(v: &[LoadSample]) -> Vec<i64> {
        v.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn reference_policy() {
        let p = CapPolicy::default();
        assert_eq!(p.cap(), 600);
        assert_eq!(p.recent_slots(), 120);
        assert_eq!(p.older_slots(), 480);
    }

    #[test]
    fn within_cap_is_unchanged() {
        let p = CapPolicy::new(10, 0.2);
        let out = p.enforce(series(1..=10));
        assert_eq!(ts(&out), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn eleven_into_ten() {
        let p = CapPolicy::new(10, 0.2);
        assert_eq!(p.recent_slots(), 2);
        let out = p.enforce(series(1..=11));
        assert_eq!(out.len(), 10);
        assert_eq!(ts(&out[8..]), vec![10, 11]);
        let older = ts(&out[..8]);
        assert!(older.windows(2).all(|w| w[0] < w[1]));
        assert!(older.iter().all(|t| (1..=9).contains(t)));
        // step = 9 / 8: picks indices 0,1,2,3,4,5,6,7 → timestamps 1..=8
        assert_eq!(older, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn large_overflow_picks_evenly() {
        let p = CapPolicy::new(10, 0.2);
        let out = p.enforce(series(1..=82));
        // older = 1..=80, step = 10 → picks 1, 11, 21, ... 71
        assert_eq!(ts(&out), vec![1, 11, 21, 31, 41, 51, 61, 71, 81, 82]);
    }

    #[test]
    fn repeated_enforcement_coarsens_history() {
        let p = CapPolicy::new(10, 0.2);
        let mut buf = Vec::new();
        for t in 1..=100 {
            buf.push(load(t, t as f64));
            buf = p.enforce(buf);
            assert!(buf.len() <= 10);
        }
        assert_eq!(buf.last().unwrap().timestamp, 100);
        assert_eq!(buf[8].timestamp, 99);
        assert!(is_strictly_increasing(&buf));
    }

    #[test]
    fn zero_recent_fraction_still_keeps_newest() {
        let p = CapPolicy::new(4, 0.0);
        let out = p.enforce(series(1..=9));
        assert_eq!(out.len(), 4);
        assert_eq!(out.last().unwrap().timestamp, 9);
        assert!(is_strictly_increasing(&out));
    }

    #[test]
    fn zero_cap_is_raised_to_one() {
        let p = CapPolicy::new(0, 0.2);
        assert_eq!(p.cap(), 1);
        assert_eq!(p.recent_slots(), 0);
        let out = p.enforce(series(1..=5));
        assert_eq!(ts(&out), vec![5]);
    }

    #[test]
    fn fraction_of_one_is_clamped_below_cap() {
        let p = CapPolicy::new(5, 1.0);
        assert_eq!(p.recent_slots(), 4);
        assert_eq!(p.older_slots(), 1);
    }

    proptest! {
        #[test]
        fn prop_enforce_bounded_ordered_keeps_newest(
            len in 0usize..2_000,
            cap in 1usize..700,
            fraction in 0.0f64..0.95,
        ) {
            let p = CapPolicy::new(cap, fraction);
            let input: Vec<_> = (0..len as i64).map(|t| load(t * 1_000, 1.0)).collect();
            let out = p.enforce(input);
            prop_assert!(out.len() <= cap);
            prop_assert!(is_strictly_increasing(&out));
            if len > 0 {
                prop_assert_eq!(out.last().unwrap().timestamp, (len as i64 - 1) * 1_000);
            }
            if len > cap {
                prop_assert_eq!(out.len(), cap);
            }
        }
    }
}
