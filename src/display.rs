//! Render-time bucket averaging, distinct from capacity downsampling.
//!
//! Recomputed from the retained buffer on every render and never written
//! back.

use crate::config::DisplayConfig;
use crate::sample::Sample;
use crate::sequence::SeriesSnapshot;
use crate::smooth::{mean_values, moving_average, DEFAULT_WINDOW};

/// Reference point budget handed to the chart.
pub const DEFAULT_MAX_POINTS: usize = 300;

/// Reduce `samples` to at most `max_points` by averaging contiguous buckets
/// of `ceil(len / max_points)` samples.
///
/// Each output point is the bucket's middle element (`bucket[len / 2]`) with
/// its series fields replaced by the bucket means, so every timestamp is one
/// of the input timestamps. `max_points == 0` disables the transform.
pub fn downsample_for_display<S: Sample>(samples: &[S], max_points: usize) -> Vec<S> {
    if max_points == 0 || samples.len() <= max_points {
        return samples.to_vec();
    }
    let bucket_size = samples.len().div_ceil(max_points);
    samples
        .chunks(bucket_size)
        .map(|bucket| bucket[bucket.len() / 2].with_series_values(&mean_values(bucket)))
        .collect()
}

/// The full render pipeline: smooth over `window`, then display-downsample to
/// `max_points`.
pub fn prepare_for_chart<S: Sample>(samples: &[S], window: usize, max_points: usize) -> Vec<S> {
    let smoothed = moving_average(samples, window);
    downsample_for_display(&smoothed, max_points)
}

/// Render parameters for [`chart_series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartOptions {
    pub window: usize,
    pub max_points: usize,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl From<&DisplayConfig> for ChartOptions {
    fn from(cfg: &DisplayConfig) -> Self {
        Self {
            window: cfg.smoothing_window,
            max_points: cfg.max_points,
        }
    }
}

/// Render every series of a snapshot, independently per key.
pub fn chart_series<S: Sample>(
    snapshot: &SeriesSnapshot<S>,
    options: ChartOptions,
) -> Vec<(S::Key, Vec<S>)> {
    snapshot
        .iter()
        .map(|(key, seq)| {
            (
                key.clone(),
                prepare_for_chart(seq.as_slice(), options.window, options.max_points),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::load;
    use crate::sample::LoadSample;

    fn series(n: i64) -> Vec<LoadSample> {
        (1..=n).map(|t| load(t * 1_000, t as f64)).collect()
    }

    #[test]
    fn at_or_under_budget_is_unchanged() {
        let input = series(300);
        assert_eq!(downsample_for_display(&input, 300), input);
    }

    #[test]
    fn nine_hundred_into_three_hundred() {
        let input = series(900);
        let out = downsample_for_display(&input, 300);
        assert_eq!(out.len(), 300);
        let originals: std::collections::HashSet<i64> =
            input.iter().map(|s| s.timestamp).collect();
        assert!(out.iter().all(|p| originals.contains(&p.timestamp)));
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        // bucket [1,2,3]: middle is 2, mean is 2
        assert_eq!(out[0].timestamp, 2_000);
        assert!((out[0].requests_per_second - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ragged_last_bucket() {
        let input = series(10);
        let out = downsample_for_display(&input, 4);
        // bucket size 3: [1,2,3] [4,5,6] [7,8,9] [10]
        assert_eq!(
            out.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![2_000, 5_000, 8_000, 10_000]
        );
        assert!((out[3].requests_per_second - 10.0).abs() < 1e-9);
    }

    #[test]
    fn uneven_split_may_yield_fewer_points() {
        // ceil(301 / 300) = 2 → 151 buckets
        let out = downsample_for_display(&series(301), 300);
        assert_eq!(out.len(), 151);
    }

    #[test]
    fn zero_budget_disables() {
        let input = series(5);
        assert_eq!(downsample_for_display(&input, 0), input);
    }

    #[test]
    fn chart_series_renders_each_host_on_its_own() {
        use crate::sample::{HostId, InfraSample};
        use crate::sequence::SampleSequence;
        use std::collections::BTreeMap;

        let host = |id: u64, values: &[f64]| -> SampleSequence<InfraSample> {
            SampleSequence::from_ordered(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        serde_json::from_value(serde_json::json!({
                            "timestamp": i as i64,
                            "serverId": id,
                            "cpuPercent": v,
                        }))
                        .unwrap()
                    })
                    .collect(),
            )
        };
        let mut map = BTreeMap::new();
        map.insert(HostId(1), host(1, &[10.0, 20.0, 30.0]));
        map.insert(HostId(2), host(2, &[90.0, 90.0]));
        let snap = SeriesSnapshot::from_map(None, map);

        let charts = chart_series(&snap, ChartOptions { window: 3, max_points: 300 });
        assert_eq!(charts.len(), 2);
        assert_eq!(charts[0].0, HostId(1));
        assert_eq!(charts[0].1[2].cpu_percent, Some(20.0));
        // host 2 is shorter than the window: unchanged
        assert_eq!(charts[1].1[1].cpu_percent, Some(90.0));
    }

    #[test]
    fn chart_options_from_display_config() {
        let cfg = DisplayConfig {
            smoothing_window: 5,
            max_points: 120,
        };
        assert_eq!(
            ChartOptions::from(&cfg),
            ChartOptions {
                window: 5,
                max_points: 120
            }
        );
    }

    #[test]
    fn prepare_smooths_before_bucketing() {
        let input: Vec<_> = [0.0, 0.0, 30.0, 30.0]
            .iter()
            .enumerate()
            .map(|(i, v)| load(i as i64, *v))
            .collect();
        // smoothed (W=3): 0, 0, 10, 20 → buckets of 2: mean 0, mean 15
        let out = prepare_for_chart(&input, 3, 2);
        assert_eq!(out.len(), 2);
        assert!((out[0].requests_per_second - 0.0).abs() < 1e-9);
        assert!((out[1].requests_per_second - 15.0).abs() < 1e-9);
    }
}
