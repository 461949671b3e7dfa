//! Deduplicating merge of live and historical samples.
//!
//! The live channel is assumed to deliver in order. The rule here is a safety
//! net, not a sort: anything at or before the last retained timestamp is a
//! duplicate (reconnect replay) or a stale delivery and is dropped silently.

use crate::sample::Sample;

/// `true` when `incoming` may follow `last`.
pub fn accepts<S: Sample>(last: Option<&S>, incoming: &S) -> bool {
    match last {
        Some(last) => incoming.timestamp() > last.timestamp(),
        None => true,
    }
}

/// Append one live sample to `retained`.
///
/// Returns the new sequence, or `None` when the sample was dropped and
/// `retained` stays as it is.
pub fn append_live<S: Sample>(retained: &[S], incoming: S) -> Option<Vec<S>> {
    if !accepts(retained.last(), &incoming) {
        return None;
    }
    let mut next = Vec::with_capacity(retained.len() + 1);
    next.extend_from_slice(retained);
    next.push(incoming);
    Some(next)
}

/// Append a small in-order batch, applying the same rule element by element.
///
/// Returns `None` when every element was dropped.
pub fn append_live_batch<S: Sample>(retained: &[S], batch: Vec<S>) -> Option<Vec<S>> {
    let mut next: Vec<S> = retained.to_vec();
    let before = next.len();
    for s in batch {
        if accepts(next.last(), &s) {
            next.push(s);
        }
    }
    (next.len() > before).then_some(next)
}

/// Combine a one-shot historical batch with live samples that were already
/// buffered when it arrived.
///
/// History is taken in full; live samples survive only when newer than the
/// last historical timestamp, so the race between "fetch completes" and
/// "live samples start arriving" never yields an overlap.
pub fn merge_startup<S: Sample>(historical: &[S], live: &[S]) -> Vec<S> {
    let Some(last_hist) = historical.last().map(Sample::timestamp) else {
        return live.to_vec();
    };
    let mut merged = Vec::with_capacity(historical.len() + live.len());
    merged.extend_from_slice(historical);
    merged.extend(live.iter().filter(|s| s.timestamp() > last_hist).cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::load;
    use crate::sample::LoadSample;

    fn ts(v: &[LoadSample]) -> Vec<i64> {
        v.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn empty_retained_accepts_anything() {
        let next = append_live(&[], load(-5, 1.0)).unwrap();
        assert_eq!(ts(&next), vec![-5]);
    }

    #[test]
    fn newer_sample_is_appended() {
        let retained = vec![load(1, 1.0), load(2, 2.0)];
        let next = append_live(&retained, load(3, 3.0)).unwrap();
        assert_eq!(ts(&next), vec![1, 2, 3]);
        assert_eq!(retained.len(), 2, "input must stay untouched");
    }

    #[test]
    fn equal_timestamp_is_dropped() {
        let retained = vec![load(1, 1.0), load(2, 2.0)];
        assert!(append_live(&retained, load(2, 99.0)).is_none());
    }

    #[test]
    fn older_timestamp_is_dropped_not_reordered() {
        let retained = vec![load(5, 1.0), load(10, 2.0)];
        assert!(append_live(&retained, load(7, 3.0)).is_none());
    }

    #[test]
    fn same_sample_twice_changes_nothing_after_first() {
        let retained = vec![load(1, 1.0)];
        let once = append_live(&retained, load(2, 2.0)).unwrap();
        assert!(append_live(&once, load(2, 2.0)).is_none());
    }

    #[test]
    fn batch_keeps_only_advancing_elements() {
        let retained = vec![load(3, 3.0)];
        let next =
            append_live_batch(&retained, vec![load(2, 0.0), load(4, 4.0), load(4, 4.5), load(6, 6.0)])
                .unwrap();
        assert_eq!(ts(&next), vec![3, 4, 6]);
    }

    #[test]
    fn batch_of_stale_samples_is_none() {
        let retained = vec![load(3, 3.0)];
        assert!(append_live_batch(&retained, vec![load(1, 0.0), load(3, 0.0)]).is_none());
    }

    #[test]
    fn startup_merge_race() {
        let historical: Vec<_> = (1..=5).map(|t| load(t, t as f64)).collect();
        let live = vec![load(4, 40.0), load(5, 50.0), load(6, 60.0)];
        let merged = merge_startup(&historical, &live);
        assert_eq!(ts(&merged), vec![1, 2, 3, 4, 5, 6]);
        // History wins for the overlapping timestamps.
        assert!((merged[3].requests_per_second - 4.0).abs() < 1e-9);
    }

    #[test]
    fn startup_merge_empty_history_returns_live() {
        let live = vec![load(4, 4.0), load(5, 5.0)];
        assert_eq!(ts(&merge_startup(&[], &live)), vec![4, 5]);
    }

    #[test]
    fn startup_merge_empty_live_returns_history() {
        let historical = vec![load(1, 1.0), load(2, 2.0)];
        assert_eq!(ts(&merge_startup(&historical, &[])), vec![1, 2]);
    }

    #[test]
    fn startup_merge_live_entirely_older_is_discarded() {
        let historical = vec![load(10, 1.0), load(11, 2.0)];
        let live = vec![load(3, 3.0), load(4, 4.0)];
        assert_eq!(ts(&merge_startup(&historical, &live)), vec![10, 11]);
    }
}
