//! Per-family aggregator: historical backfill + live stream → bounded series.
//!
//! ## Responsibility
//! Given a subject, produce a continuously updated, bounded, time-ordered
//! [`SeriesSnapshot`] plus a connectivity flag.
//!
//! ## Guarantees
//! - One driver task owns every buffer; "receive sample" and "update buffer"
//!   never interleave and no lock guards the buffers
//! - Every inbound event carries the generation it was started under; an
//!   event from an older generation is a no-op, so a late message for subject
//!   A never lands in subject B's buffer
//! - A buffer is only replaced after the next valid sequence is fully built
//! - Dropping the [`Aggregator`] tears down the driver, the live subscription
//!   and any in-flight fetch

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::backfill::HistorySource;
use crate::config::LoadwatchConfig;
use crate::error::Result;
use crate::history::CapPolicy;
use crate::sample::{Sample, SubjectId, SubjectStatus};
use crate::sequence::{SampleSequence, SeriesSnapshot};
use crate::subscription::StreamSubscription;
use crate::transport::{ChannelEvent, Transport};

/// Tuning knobs of an [`Aggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregatorSettings {
    /// Cap and recent window applied to every retained series.
    pub cap: CapPolicy,
}

impl AggregatorSettings {
    pub fn from_config(cfg: &LoadwatchConfig) -> Self {
        Self {
            cap: cfg.buffer.cap_policy(),
        }
    }
}

/// Why a historical fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    /// Startup backfill, merged with whatever live data already arrived.
    Backfill,
    /// Snapshot taken after the run ended; replaces the buffer when non-empty.
    Final,
}

/// Everything the driver reacts to.
enum Inbound<S> {
    Observe {
        generation: u64,
        subject: Option<SubjectId>,
        status: SubjectStatus,
    },
    Finalize {
        generation: u64,
    },
    Clear {
        generation: u64,
    },
    History {
        generation: u64,
        kind: FetchKind,
        result: Result<Vec<S>>,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
}

impl<S> Inbound<S> {
    fn generation(&self) -> u64 {
        match self {
            Inbound::Observe { generation, .. }
            | Inbound::Finalize { generation }
            | Inbound::Clear { generation }
            | Inbound::History { generation, .. }
            | Inbound::Channel { generation, .. } => *generation,
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Handle to a running aggregator for the sample family `S`.
pub struct Aggregator<S: Sample> {
    generation: Arc<AtomicU64>,
    inbox: mpsc::UnboundedSender<Inbound<S>>,
    samples: watch::Receiver<SeriesSnapshot<S>>,
    connected: watch::Receiver<bool>,
    driver: JoinHandle<()>,
}

impl<S: Sample> Aggregator<S> {
    /// Start the driver task. Must be called inside a Tokio runtime.
    pub fn spawn<T, H>(transport: T, history: H, settings: AggregatorSettings) -> Self
    where
        T: Transport,
        H: HistorySource<S>,
    {
        let generation = Arc::new(AtomicU64::new(0));
        let (inbox, rx) = mpsc::unbounded_channel();
        let (publish, samples) = watch::channel(SeriesSnapshot::default());
        let subscription = StreamSubscription::new();
        let connected = subscription.connectivity();

        let driver = Driver {
            transport,
            history: Arc::new(history),
            settings,
            generation: Arc::clone(&generation),
            inbox: inbox.clone(),
            subject: None,
            series: BTreeMap::new(),
            subscription,
            publish,
            fetches: Vec::new(),
        };
        let driver = tokio::spawn(driver.run(rx));

        Self {
            generation,
            inbox,
            samples,
            connected,
            driver,
        }
    }

    /// Switch to `subject` (or to nothing).
    ///
    /// The previous subject is invalidated before this returns: nothing it
    /// still has in flight can reach the buffers afterwards.
    pub fn observe(&self, subject: Option<SubjectId>, status: SubjectStatus) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.send(Inbound::Observe {
            generation,
            subject,
            status,
        });
    }

    /// The observed run has ended: stop streaming and swap in the persisted
    /// final snapshot (kept live data wins if that snapshot is empty).
    pub fn finalize(&self) {
        let generation = self.current_generation();
        self.send(Inbound::Finalize { generation });
    }

    /// Empty the buffers of the current subject.
    pub fn clear(&self) {
        let generation = self.current_generation();
        self.send(Inbound::Clear { generation });
    }

    /// Receiver of every published snapshot.
    pub fn samples(&self) -> watch::Receiver<SeriesSnapshot<S>> {
        self.samples.clone()
    }

    /// Snapshot stream: the current snapshot first, then every later one.
    /// Intermediate snapshots may be skipped by a slow consumer.
    pub fn updates(&self) -> WatchStream<SeriesSnapshot<S>> {
        WatchStream::new(self.samples.clone())
    }

    /// Receiver of the connectivity flag.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn latest(&self) -> SeriesSnapshot<S> {
        self.samples.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn send(&self, msg: Inbound<S>) {
        if self.inbox.send(msg).is_err() {
            warn!(family = %S::FAMILY, "aggregator driver is gone");
        }
    }
}

impl<S: Sample> Drop for Aggregator<S> {
    fn drop(&mut self) {
        // Invalidate whatever is still in flight, then stop the driver.
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.driver.abort();
    }
}

impl<S: Sample> std::fmt::Debug for Aggregator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("family", &S::FAMILY)
            .field("generation", &self.current_generation())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver<S: Sample, T, H> {
    transport: T,
    history: Arc<H>,
    settings: AggregatorSettings,
    generation: Arc<AtomicU64>,
    inbox: mpsc::UnboundedSender<Inbound<S>>,
    subject: Option<SubjectId>,
    series: BTreeMap<S::Key, SampleSequence<S>>,
    subscription: StreamSubscription,
    publish: watch::Sender<SeriesSnapshot<S>>,
    fetches: Vec<JoinHandle<()>>,
}

impl<S, T, H> Driver<S, T, H>
where
    S: Sample,
    T: Transport,
    H: HistorySource<S>,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound<S>>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation.load(Ordering::Acquire)
    }

    fn handle(&mut self, msg: Inbound<S>) {
        if !self.is_current(msg.generation()) {
            debug!(family = %S::FAMILY, generation = msg.generation(), "dropping stale event");
            return;
        }
        match msg {
            Inbound::Observe {
                generation,
                subject,
                status,
            } => self.on_observe(generation, subject, status),
            Inbound::Finalize { generation } => self.on_finalize(generation),
            Inbound::Clear { .. } => {
                self.series.clear();
                self.publish();
            }
            Inbound::History { kind, result, .. } => self.on_history(kind, result),
            Inbound::Channel { event, .. } => {
                if let Some(body) = self.subscription.on_event(event) {
                    self.on_message(&body);
                }
            }
        }
    }

    fn on_observe(&mut self, generation: u64, subject: Option<SubjectId>, status: SubjectStatus) {
        self.subscription.close();
        self.abort_fetches();
        self.series.clear();
        self.subject = subject;
        self.publish();

        let Some(subject) = subject else {
            debug!(family = %S::FAMILY, "observing nothing");
            return;
        };
        info!(family = %S::FAMILY, %subject, ?status, "observing subject");

        self.spawn_fetch(subject, generation, FetchKind::Backfill);
        if status == SubjectStatus::Active {
            let tx = self.inbox.clone();
            let topic = S::FAMILY.live_topic(subject);
            self.subscription.open(&self.transport, &topic, move |event| {
                tx.send(Inbound::Channel { generation, event }).is_ok()
            });
        }
    }

    fn on_finalize(&mut self, generation: u64) {
        let Some(subject) = self.subject else {
            return;
        };
        info!(family = %S::FAMILY, %subject, "finalizing subject");
        self.subscription.close();
        self.spawn_fetch(subject, generation, FetchKind::Final);
    }

    fn on_history(&mut self, kind: FetchKind, result: Result<Vec<S>>) {
        let samples = result.unwrap_or_else(|e| {
            warn!(
                error = %e,
                family = %S::FAMILY,
                subject = ?self.subject,
                ?kind,
                "history fetch failed, continuing without it"
            );
            Vec::new()
        });
        if samples.is_empty() {
            debug!(family = %S::FAMILY, ?kind, "no history");
            return;
        }

        let cap = &self.settings.cap;
        let grouped = group_by_key(samples);
        match kind {
            FetchKind::Backfill => {
                for (key, historical) in grouped {
                    let live = self.series.get(&key).cloned().unwrap_or_default();
                    self.series.insert(key, live.with_history(historical, cap));
                }
            }
            FetchKind::Final => {
                self.series = grouped
                    .into_iter()
                    .map(|(key, historical)| {
                        (key, SampleSequence::empty().with_history(historical, cap))
                    })
                    .collect();
            }
        }
        self.publish();
    }

    fn on_message(&mut self, body: &str) {
        let sample: S = match serde_json::from_str(body) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    error = %e,
                    family = %S::FAMILY,
                    subject = ?self.subject,
                    "dropping malformed sample"
                );
                return;
            }
        };
        let key = sample.series_key();
        let current = self.series.get(&key).cloned().unwrap_or_default();
        if let Some(next) = current.push_live(sample, &self.settings.cap) {
            self.series.insert(key, next);
            self.publish();
        }
    }

    fn spawn_fetch(&mut self, subject: SubjectId, generation: u64, kind: FetchKind) {
        let history = Arc::clone(&self.history);
        let tx = self.inbox.clone();
        self.fetches.retain(|handle| !handle.is_finished());
        self.fetches.push(tokio::spawn(async move {
            let result = HistorySource::<S>::fetch(&*history, subject).await;
            let _ = tx.send(Inbound::History {
                generation,
                kind,
                result,
            });
        }));
    }

    fn abort_fetches(&mut self) {
        for handle in self.fetches.drain(..) {
            handle.abort();
        }
    }

    fn publish(&self) {
        self.publish
            .send_replace(SeriesSnapshot::from_map(self.subject, self.series.clone()));
    }
}

impl<S: Sample, T, H> Drop for Driver<S, T, H> {
    fn drop(&mut self) {
        for handle in self.fetches.drain(..) {
            handle.abort();
        }
    }
}

/// Split a batch into per-key runs, keeping the input order inside each run.
fn group_by_key<S: Sample>(samples: Vec<S>) -> BTreeMap<S::Key, Vec<S>> {
    let mut grouped: BTreeMap<S::Key, Vec<S>> = BTreeMap::new();
    for s in samples {
        grouped.entry(s.series_key()).or_default().push(s);
    }
    grouped
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::load;
    use crate::sample::{HostId, InfraSample, LoadSample};
    use crate::transport::{TopicFeed, TopicSubscription};
    use std::future::Future;
    use std::time::Duration;

    struct NoHistory;

    impl<S: Sample> HistorySource<S> for NoHistory {
        fn fetch(&self, _subject: SubjectId) -> impl Future<Output = Result<Vec<S>>> + Send {
            async { Ok(Vec::new()) }
        }
    }

    /// Hands each new subscription's feed to the test.
    struct ChannelTransport {
        opened: mpsc::UnboundedSender<TopicFeed>,
    }

    impl Transport for ChannelTransport {
        fn subscribe(&self, topic: &str) -> TopicSubscription {
            let (sub, feed) = TopicSubscription::pair(topic);
            let _ = self.opened.send(feed);
            sub
        }
    }

    fn infra(ts: i64, host: u64, cpu: f64) -> InfraSample {
        serde_json::from_value(serde_json::json!({
            "timestamp": ts,
            "serverId": host,
            "cpuPercent": cpu,
        }))
        .unwrap()
    }

    #[test]
    fn group_by_key_splits_hosts_and_keeps_order() {
        let grouped = group_by_key(vec![
            infra(1, 1, 10.0),
            infra(1, 2, 20.0),
            infra(2, 1, 11.0),
            infra(2, 2, 21.0),
        ]);
        assert_eq!(grouped.len(), 2);
        let host1: Vec<i64> = grouped[&HostId(1)].iter().map(|s| s.timestamp).collect();
        assert_eq!(host1, vec![1, 2]);
    }

    #[test]
    fn settings_follow_buffer_config() {
        let mut cfg = LoadwatchConfig::default();
        cfg.buffer.max_samples = 50;
        cfg.buffer.recent_fraction = 0.1;
        let settings = AggregatorSettings::from_config(&cfg);
        assert_eq!(settings.cap.cap(), 50);
        assert_eq!(settings.cap.recent_slots(), 5);
    }

    #[tokio::test]
    async fn stale_generation_events_are_ignored() {
        let (opened, mut feeds) = mpsc::unbounded_channel();
        let agg: Aggregator<LoadSample> = Aggregator::spawn(
            ChannelTransport { opened },
            NoHistory,
            AggregatorSettings::default(),
        );
        let mut rx = agg.samples();

        agg.observe(Some(SubjectId(1)), SubjectStatus::Active);
        let old_generation = agg.current_generation();
        let _feed_a = feeds.recv().await.unwrap();

        agg.observe(Some(SubjectId(2)), SubjectStatus::Active);
        let feed_b = feeds.recv().await.unwrap();

        // A message still tagged with subject 1's generation.
        let body = serde_json::to_string(&load(99, 1.0)).unwrap();
        agg.inbox
            .send(Inbound::Channel {
                generation: old_generation,
                event: ChannelEvent::Message(body),
            })
            .unwrap();
        feed_b.send(ChannelEvent::Connected);
        feed_b.send(ChannelEvent::Message(serde_json::to_string(&load(5, 1.0)).unwrap()));

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if snap.total_samples() > 0 {
                        break;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timeout");

        let snap = agg.latest();
        assert_eq!(snap.subject(), Some(SubjectId(2)));
        let ts: Vec<i64> = snap.samples().iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![5]);
    }

    #[tokio::test]
    async fn stale_history_result_is_ignored() {
        let (opened, _feeds) = mpsc::unbounded_channel();
        let agg: Aggregator<LoadSample> = Aggregator::spawn(
            ChannelTransport { opened },
            NoHistory,
            AggregatorSettings::default(),
        );
        agg.observe(Some(SubjectId(1)), SubjectStatus::Terminal);
        let old_generation = agg.current_generation();
        agg.observe(Some(SubjectId(2)), SubjectStatus::Terminal);

        agg.inbox
            .send(Inbound::History {
                generation: old_generation,
                kind: FetchKind::Backfill,
                result: Ok(vec![load(1, 1.0), load(2, 2.0)]),
            })
            .unwrap();
        // Clear is processed after the stale history in FIFO order.
        agg.clear();
        let mut rx = agg.samples();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.subject(), Some(SubjectId(2)));
        assert!(snap.is_empty());
    }
}
