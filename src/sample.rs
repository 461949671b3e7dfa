//! Metric samples and the three families the backend streams.
//!
//! A sample is an immutable, producer-timestamped observation. The stream
//! transforms never look at concrete fields: they go through the [`Sample`]
//! trait, which exposes the timestamp, the series key used to demultiplex one
//! topic into independent series, and the numeric "series values" that
//! smoothing and display downsampling average. Everything else on a sample is
//! passthrough.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// Identifier of the test run that scopes one metrics stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubjectId {
    fn from(id: u64) -> Self {
        SubjectId(id)
    }
}

/// Whether more samples can still arrive for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectStatus {
    /// Queued or running: open the live channel.
    Active,
    /// Finished, failed or cancelled: serve persisted samples only.
    Terminal,
}

// ---------------------------------------------------------------------------
// Families
// ---------------------------------------------------------------------------

/// The metric families the backend publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    /// HTTP load-test metrics.
    Load,
    /// Browser-automation test metrics.
    Browser,
    /// Per-host infrastructure metrics collected during a run.
    Infra,
}

impl MetricFamily {
    /// Live topic carrying this family's samples for `subject`.
    pub fn live_topic(self, subject: SubjectId) -> String {
        match self {
            MetricFamily::Load => format!("/topic/metrics/{subject}"),
            MetricFamily::Browser => format!("/topic/selenium-metrics/{subject}"),
            MetricFamily::Infra => format!("/topic/infra-metrics/{subject}"),
        }
    }

    /// Kind of run the samples belong to. Load and browser samples only
    /// exist on their own kind of run; infra readings are collected for
    /// either, so `requested` decides.
    pub fn run_kind(self, requested: RunKind) -> RunKind {
        match self {
            MetricFamily::Load => RunKind::Load,
            MetricFamily::Browser => RunKind::Browser,
            MetricFamily::Infra => requested,
        }
    }

    /// REST path returning the persisted samples for `subject`, a run of
    /// kind `run` (ignored unless the family rides on either kind).
    pub fn history_path(self, run: RunKind, subject: SubjectId) -> String {
        let base = self.run_kind(run).run_path(subject);
        match self {
            MetricFamily::Load | MetricFamily::Browser => format!("{base}/metrics"),
            MetricFamily::Infra => format!("{base}/infra-metrics"),
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricFamily::Load => write!(f, "load"),
            MetricFamily::Browser => write!(f, "browser"),
            MetricFamily::Infra => write!(f, "infra"),
        }
    }
}

/// The two kinds of test run the backend executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// HTTP load test.
    #[default]
    Load,
    /// Browser-automation test.
    Browser,
}

impl RunKind {
    /// REST path describing the run itself (status, labels, ...).
    pub fn run_path(self, subject: SubjectId) -> String {
        match self {
            RunKind::Load => format!("/api/tests/{subject}"),
            RunKind::Browser => format!("/api/selenium/tests/{subject}"),
        }
    }

    /// Side-channel topic carrying plain status tokens for `subject`.
    pub fn status_topic(self, subject: SubjectId) -> String {
        match self {
            RunKind::Load => format!("/topic/test-status/{subject}"),
            RunKind::Browser => format!("/topic/selenium-status/{subject}"),
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Load => write!(f, "load"),
            RunKind::Browser => write!(f, "browser"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample trait
// ---------------------------------------------------------------------------

/// A timestamped observation of one metric family.
pub trait Sample: Clone + fmt::Debug + Send + Sync + DeserializeOwned + 'static {
    /// Family this sample type belongs to.
    const FAMILY: MetricFamily;

    /// Key that separates interleaved series sharing one topic.
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    /// Producer-assigned timestamp, milliseconds since epoch.
    fn timestamp(&self) -> i64;

    fn series_key(&self) -> Self::Key;

    /// Numeric fields averaged by smoothing and display downsampling, in a
    /// fixed per-type order. `None` means "not applicable for this sample".
    fn series_values(&self) -> Vec<Option<f64>>;

    /// Copy of `self` with the series fields replaced by `values` (same order
    /// as [`Sample::series_values`]). Timestamp and passthrough fields are kept.
    fn with_series_values(&self, values: &[Option<f64>]) -> Self;
}

fn value_at(values: &[Option<f64>], idx: usize) -> Option<f64> {
    values.get(idx).copied().flatten()
}

// ---------------------------------------------------------------------------
// Load-test samples
// ---------------------------------------------------------------------------

/// One periodic snapshot of an HTTP load test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSample {
    pub timestamp: i64,
    pub requests_per_second: f64,
    pub errors_per_second: f64,
    pub mean_response_time: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub active_users: f64,
    /// Cumulative since run start; never averaged.
    pub total_requests: u64,
    /// Cumulative since run start; never averaged.
    pub total_errors: u64,
}

impl Sample for LoadSample {
    const FAMILY: MetricFamily = MetricFamily::Load;
    type Key = ();

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn series_key(&self) -> Self::Key {}

    fn series_values(&self) -> Vec<Option<f64>> {
        vec![
            Some(self.requests_per_second),
            Some(self.errors_per_second),
            Some(self.mean_response_time),
            Some(self.p50),
            Some(self.p75),
            Some(self.p95),
            Some(self.p99),
            Some(self.active_users),
        ]
    }

    fn with_series_values(&self, values: &[Option<f64>]) -> Self {
        let v = |i: usize, orig: f64| value_at(values, i).unwrap_or(orig);
        LoadSample {
            requests_per_second: v(0, self.requests_per_second),
            errors_per_second: v(1, self.errors_per_second),
            mean_response_time: v(2, self.mean_response_time),
            p50: v(3, self.p50),
            p75: v(4, self.p75),
            p95: v(5, self.p95),
            p99: v(6, self.p99),
            active_users: v(7, self.active_users),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Browser-test samples
// ---------------------------------------------------------------------------

/// One periodic snapshot of a browser-automation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSample {
    pub timestamp: i64,
    pub iterations_per_second: f64,
    pub errors_per_second: f64,
    pub mean_step_duration: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub active_browsers: f64,
    pub total_iterations: u64,
    pub total_errors: u64,
    /// Host CPU of the grid node, when the collector could read it.
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
}

impl Sample for BrowserSample {
    const FAMILY: MetricFamily = MetricFamily::Browser;
    type Key = ();

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn series_key(&self) -> Self::Key {}

    fn series_values(&self) -> Vec<Option<f64>> {
        vec![
            Some(self.iterations_per_second),
            Some(self.errors_per_second),
            Some(self.mean_step_duration),
            Some(self.p50),
            Some(self.p75),
            Some(self.p95),
            Some(self.p99),
            Some(self.active_browsers),
            self.cpu_percent,
            self.memory_percent,
        ]
    }

    fn with_series_values(&self, values: &[Option<f64>]) -> Self {
        let v = |i: usize, orig: f64| value_at(values, i).unwrap_or(orig);
        BrowserSample {
            iterations_per_second: v(0, self.iterations_per_second),
            errors_per_second: v(1, self.errors_per_second),
            mean_step_duration: v(2, self.mean_step_duration),
            p50: v(3, self.p50),
            p75: v(4, self.p75),
            p95: v(5, self.p95),
            p99: v(6, self.p99),
            // A browser count, so averages are shown whole.
            active_browsers: v(7, self.active_browsers).round(),
            cpu_percent: value_at(values, 8),
            memory_percent: value_at(values, 9),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Infrastructure samples
// ---------------------------------------------------------------------------

/// Identifier of a monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// One utilization reading of a monitored host. Many hosts interleave on the
/// same topic; [`Sample::series_key`] separates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraSample {
    pub timestamp: i64,
    pub server_id: HostId,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub server_type: Option<String>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_used_bytes: Option<f64>,
    #[serde(default)]
    pub memory_total_bytes: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub disk_read_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub disk_write_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub network_recv_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub network_sent_bytes_per_sec: Option<f64>,
    #[serde(default)]
    pub sql_batch_per_sec: Option<f64>,
    /// Collector error for this reading (host unreachable and similar).
    #[serde(default)]
    pub error: Option<String>,
}

impl Sample for InfraSample {
    const FAMILY: MetricFamily = MetricFamily::Infra;
    type Key = HostId;

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn series_key(&self) -> HostId {
        self.server_id
    }

    fn series_values(&self) -> Vec<Option<f64>> {
        vec![
            self.cpu_percent,
            self.memory_used_bytes,
            self.memory_total_bytes,
            self.memory_percent,
            self.disk_read_bytes_per_sec,
            self.disk_write_bytes_per_sec,
            self.network_recv_bytes_per_sec,
            self.network_sent_bytes_per_sec,
            self.sql_batch_per_sec,
        ]
    }

    fn with_series_values(&self, values: &[Option<f64>]) -> Self {
        InfraSample {
            cpu_percent: value_at(values, 0),
            memory_used_bytes: value_at(values, 1),
            memory_total_bytes: value_at(values, 2),
            memory_percent: value_at(values, 3),
            disk_read_bytes_per_sec: value_at(values, 4),
            disk_write_bytes_per_sec: value_at(values, 5),
            network_recv_bytes_per_sec: value_at(values, 6),
            network_sent_bytes_per_sec: value_at(values, 7),
            sql_batch_per_sec: value_at(values, 8),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
