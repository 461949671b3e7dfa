//! The retained buffer: an immutable, strictly time-ordered run of samples.
//!
//! ## Guarantees
//! - Timestamps strictly increase (no duplicates)
//! - Never mutated in place: every update builds a new sequence, so consumers
//!   detect change with [`SampleSequence::ptr_eq`]
//! - Cheap to clone (shared `Arc<[S]>`)

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::history::CapPolicy;
use crate::merge;
use crate::sample::{Sample, SubjectId};

/// An ordered, deduplicated sample run.
#[derive(Debug)]
pub struct SampleSequence<S> {
    items: Arc<[S]>,
}

impl<S> Clone for SampleSequence<S> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<S> Default for SampleSequence<S> {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
        }
    }
}

impl<S: Sample> SampleSequence<S> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a sequence from samples that are already strictly increasing.
    ///
    /// Samples whose timestamp does not exceed the previous kept one are
    /// skipped, so the result is valid whatever the input.
    pub fn from_ordered(samples: Vec<S>) -> Self {
        let mut kept: Vec<S> = Vec::with_capacity(samples.len());
        for s in samples {
            if merge::accepts(kept.last(), &s) {
                kept.push(s);
            }
        }
        Self::from_valid(kept)
    }

    /// Wrap a vector that is known to satisfy the ordering invariant.
    pub(crate) fn from_valid(samples: Vec<S>) -> Self {
        debug_assert!(is_strictly_increasing(&samples));
        Self {
            items: Arc::from(samples),
        }
    }

    pub fn as_slice(&self) -> &[S] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&S> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&S> {
        self.items.last()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.items.last().map(Sample::timestamp)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, S> {
        self.items.iter()
    }

    /// `true` when both handles point at the same underlying buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }

    pub fn to_vec(&self) -> Vec<S> {
        self.items.to_vec()
    }

    /// Append one live sample and enforce the cap.
    ///
    /// Returns `None` when the sample is a duplicate or stale delivery; the
    /// caller keeps the current sequence untouched.
    pub fn push_live(&self, incoming: S, policy: &CapPolicy) -> Option<Self> {
        let appended = merge::append_live(&self.items, incoming)?;
        Some(Self::from_valid(policy.enforce(appended)))
    }

    /// Combine a historical batch with what this (live) sequence already holds.
    pub fn with_history(&self, historical: Vec<S>, policy: &CapPolicy) -> Self {
        let historical = Self::from_ordered(historical);
        let merged = merge::merge_startup(historical.as_slice(), &self.items);
        Self::from_valid(policy.enforce(merged))
    }
}

impl<'a, S> IntoIterator for &'a SampleSequence<S> {
    type Item = &'a S;
    type IntoIter = std::slice::Iter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// `true` when every timestamp is strictly greater than the one before it.
pub fn is_strictly_increasing<S: Sample>(samples: &[S]) -> bool {
    samples
        .windows(2)
        .all(|w| w[0].timestamp() < w[1].timestamp())
}

// ---------------------------------------------------------------------------
// SeriesSnapshot: what consumers observe
// ---------------------------------------------------------------------------

/// All series of one subject, keyed by [`Sample::Key`].
///
/// Load and browser families have exactly one series (key `()`); the
/// infrastructure family has one series per monitored host.
#[derive(Debug)]
pub struct SeriesSnapshot<S: Sample> {
    subject: Option<SubjectId>,
    series: Arc<BTreeMap<S::Key, SampleSequence<S>>>,
}

impl<S: Sample> Clone for SeriesSnapshot<S> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject,
            series: Arc::clone(&self.series),
        }
    }
}

impl<S: Sample> Default for SeriesSnapshot<S> {
    fn default() -> Self {
        Self {
            subject: None,
            series: Arc::new(BTreeMap::new()),
        }
    }
}

impl<S: Sample> SeriesSnapshot<S> {
    pub(crate) fn from_map(
        subject: Option<SubjectId>,
        series: BTreeMap<S::Key, SampleSequence<S>>,
    ) -> Self {
        Self {
            subject,
            series: Arc::new(series),
        }
    }

    /// Subject these series belong to; `None` when nothing is observed.
    pub fn subject(&self) -> Option<SubjectId> {
        self.subject
    }

    pub fn get(&self, key: &S::Key) -> Option<&SampleSequence<S>> {
        self.series.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &S::Key> {
        self.series.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S::Key, &SampleSequence<S>)> {
        self.series.iter()
    }

    /// Number of series (hosts, for the infrastructure family).
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Total number of retained samples across all series.
    pub fn total_samples(&self) -> usize {
        self.series.values().map(SampleSequence::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples() == 0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.series, &other.series)
    }
}

impl<S: Sample<Key = ()>> SeriesSnapshot<S> {
    /// The single series of a one-series family (empty before any sample).
    pub fn samples(&self) -> SampleSequence<S> {
        self.series.get(&()).cloned().unwrap_or_default()
    }
}
