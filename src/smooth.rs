//! Trailing moving-average smoothing for display.
//!
//! Pure: returns a new vector, never touches the retained buffer, and is
//! recomputed on every render. Runs before display downsampling so the
//! average covers true consecutive samples.

use crate::sample::Sample;

/// Reference window size.
pub const DEFAULT_WINDOW: usize = 3;

/// Mean of the present values in `column`, `None` if all are absent.
pub(crate) fn mean_present<I>(column: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = column
        .into_iter()
        .flatten()
        .fold((0.0_f64, 0_usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Column-wise mean of several samples' series values.
pub(crate) fn mean_values<S: Sample>(samples: &[S]) -> Vec<Option<f64>> {
    let rows: Vec<Vec<Option<f64>>> = samples.iter().map(Sample::series_values).collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|col| mean_present(rows.iter().map(|row| row.get(col).copied().flatten())))
        .collect()
}

/// Replace each series field of element `i` by its mean over
/// `[max(0, i - window + 1), i]`.
///
/// Inputs shorter than `window` (and `window <= 1`) come back unchanged, so a
/// stream that just started is not shown a fake average.
pub fn moving_average<S: Sample>(samples: &[S], window: usize) -> Vec<S> {
    if window <= 1 || samples.len() < window {
        return samples.to_vec();
    }
    let rows: Vec<Vec<Option<f64>>> = samples.iter().map(Sample::series_values).collect();
    samples
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let start = (i + 1).saturating_sub(window);
            let slice = &rows[start..=i];
            let width = rows[i].len();
            let means: Vec<Option<f64>> = (0..width)
                .map(|col| mean_present(slice.iter().map(|row| row.get(col).copied().flatten())))
                .collect();
            point.with_series_values(&means)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::load;
    use crate::sample::{BrowserSample, HostId, InfraSample, LoadSample};
    use proptest::prelude::*;
    use rstest::rstest;

    fn rps(v: &[LoadSample]) -> Vec<f64> {
        v.iter().map(|s| s.requests_per_second).collect()
    }

    #[test]
    fn three_point_reference_case() {
        let input = vec![load(1, 10.0), load(2, 20.0), load(3, 30.0)];
        let out = moving_average(&input, 3);
        assert_eq!(rps(&out), vec![10.0, 15.0, 20.0]);
        assert_eq!(out.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    fn shorter_than_window_is_identity(#[case] len: usize) {
        let input: Vec<_> = (0..len as i64).map(|t| load(t, (t * 7) as f64)).collect();
        assert_eq!(moving_average(&input, 3), input);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn trivial_window_is_identity(#[case] window: usize) {
        let input = vec![load(1, 10.0), load(2, 20.0), load(3, 30.0)];
        assert_eq!(moving_average(&input, window), input);
    }

    #[test]
    fn window_slides_after_fill() {
        let input: Vec<_> = [3.0, 6.0, 9.0, 12.0, 0.0]
            .iter()
            .enumerate()
            .map(|(i, v)| load(i as i64, *v))
            .collect();
        let out = moving_average(&input, 3);
        assert_eq!(rps(&out), vec![3.0, 4.5, 6.0, 9.0, 7.0]);
    }

    #[test]
    fn counters_pass_through() {
        let input = vec![load(1, 10.0), load(2, 20.0), load(3, 30.0)];
        let out = moving_average(&input, 3);
        for (a, b) in input.iter().zip(&out) {
            assert_eq!(a.total_requests, b.total_requests);
            assert_eq!(a.total_errors, b.total_errors);
        }
    }

    #[test]
    fn input_is_not_mutated() {
        let input = vec![load(1, 10.0), load(2, 20.0), load(3, 30.0)];
        let copy = input.clone();
        let _ = moving_average(&input, 2);
        assert_eq!(input, copy);
    }

    #[test]
    fn nullable_fields_average_present_values_only() {
        let mk = |ts: i64, cpu: Option<f64>| BrowserSample {
            timestamp: ts,
            iterations_per_second: 1.0,
            errors_per_second: 0.0,
            mean_step_duration: 100.0,
            p50: 1.0,
            p75: 1.0,
            p95: 1.0,
            p99: 1.0,
            active_browsers: 2.0,
            total_iterations: 0,
            total_errors: 0,
            cpu_percent: cpu,
            memory_percent: None,
        };
        let input = vec![mk(1, Some(10.0)), mk(2, None), mk(3, Some(30.0))];
        let out = moving_average(&input, 3);
        assert_eq!(out[1].cpu_percent, Some(10.0));
        assert_eq!(out[2].cpu_percent, Some(20.0));
        assert!(out.iter().all(|s| s.memory_percent.is_none()));
    }

    #[test]
    fn infra_passthrough_identity_fields() {
        let mk = |ts: i64, cpu: f64| InfraSample {
            timestamp: ts,
            server_id: HostId(4),
            server_name: "app-1".into(),
            server_type: Some("LINUX".into()),
            cpu_percent: Some(cpu),
            memory_used_bytes: None,
            memory_total_bytes: None,
            memory_percent: None,
            disk_read_bytes_per_sec: None,
            disk_write_bytes_per_sec: None,
            network_recv_bytes_per_sec: None,
            network_sent_bytes_per_sec: None,
            sql_batch_per_sec: None,
            error: None,
        };
        let out = moving_average(&[mk(1, 10.0), mk(2, 20.0)], 2);
        assert_eq!(out[1].server_name, "app-1");
        assert_eq!(out[1].server_id, HostId(4));
        assert_eq!(out[1].cpu_percent, Some(15.0));
    }

    #[test]
    fn mean_present_handles_empty() {
        assert_eq!(mean_present(Vec::<Option<f64>>::new()), None);
        assert_eq!(mean_present(vec![None, None]), None);
        assert_eq!(mean_present(vec![Some(2.0), None, Some(4.0)]), Some(3.0));
    }

    proptest! {
        #[test]
        fn prop_keeps_length_timestamps_and_range(
            values in prop::collection::vec(0.0f64..1_000.0, 0..200),
            window in 0usize..12,
        ) {
            let input: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, v)| load(i as i64, *v))
                .collect();
            let out = moving_average(&input, window);
            prop_assert_eq!(out.len(), input.len());
            for (a, b) in input.iter().zip(&out) {
                prop_assert_eq!(a.timestamp, b.timestamp);
            }
            let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for s in &out {
                prop_assert!(s.requests_per_second >= lo - 1e-9);
                prop_assert!(s.requests_per_second <= hi + 1e-9);
            }
        }

        #[test]
        fn prop_shorter_than_window_is_identity(
            values in prop::collection::vec(0.0f64..1_000.0, 0..20),
            extra in 1usize..10,
        ) {
            let input: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, v)| load(i as i64, *v))
                .collect();
            let window = input.len() + extra;
            prop_assert_eq!(moving_average(&input, window), input);
        }
    }
}
