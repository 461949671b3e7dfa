use std::path::PathBuf;

use clap::Parser;

use crate::config::LoadwatchConfig;
use crate::display::{chart_series, ChartOptions};
use crate::sample::{
    BrowserSample, InfraSample, LoadSample, MetricFamily, RunKind, Sample, SubjectId,
};
use crate::sequence::SeriesSnapshot;

#[derive(Parser, Debug)]
#[command(name = "loadwatch")]
#[command(version)]
#[command(about = "Follow the live metrics of a load-test run from the terminal")]
pub struct Args {
    /// Id of the test run to follow
    pub test_id: u64,

    /// Metric family to stream
    #[arg(long, value_enum, default_value = "load")]
    pub family: MetricFamily,

    /// Kind of run the id refers to (only consulted for --family infra)
    #[arg(long, value_enum, default_value = "load")]
    pub run: RunKind,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Dashboard REST base URL (overrides config and environment)
    #[arg(long)]
    pub base_url: Option<String>,

    /// STOMP WebSocket endpoint (overrides config and environment)
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Treat the run as finished: print persisted samples, no live stream
    #[arg(long)]
    pub terminal: bool,
}

impl Args {
    pub fn subject(&self) -> SubjectId {
        SubjectId(self.test_id)
    }

    /// Kind of run being followed: fixed by the family, except for infra.
    pub fn run_kind(&self) -> RunKind {
        self.family.run_kind(self.run)
    }

    /// Command-line URLs win over the file and the environment.
    pub fn apply_overrides(&self, config: &mut LoadwatchConfig) {
        if let Some(url) = &self.base_url {
            config.server.base_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.server.ws_url = url.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Summary lines
// ---------------------------------------------------------------------------

/// One-line rendering of a (smoothed) sample.
pub trait SummaryLine {
    /// Series label, for families with more than one series.
    fn label(&self) -> Option<String> {
        None
    }

    fn summary(&self) -> String;
}

fn opt(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.1}{unit}"),
        None => "-".to_string(),
    }
}

impl SummaryLine for LoadSample {
    fn summary(&self) -> String {
        format!(
            "rps {:.1} | err/s {:.1} | mean {:.0}ms | p95 {:.0}ms | p99 {:.0}ms | users {:.0} | total {} ({} errors)",
            self.requests_per_second,
            self.errors_per_second,
            self.mean_response_time,
            self.p95,
            self.p99,
            self.active_users,
            self.total_requests,
            self.total_errors
        )
    }
}

impl SummaryLine for BrowserSample {
    fn summary(&self) -> String {
        format!(
            "it/s {:.2} | err/s {:.2} | step {:.0}ms | p95 {:.0}ms | browsers {:.0} | cpu {} | mem {} | total {} ({} errors)",
            self.iterations_per_second,
            self.errors_per_second,
            self.mean_step_duration,
            self.p95,
            self.active_browsers,
            opt(self.cpu_percent, "%"),
            opt(self.memory_percent, "%"),
            self.total_iterations,
            self.total_errors
        )
    }
}

impl SummaryLine for InfraSample {
    fn label(&self) -> Option<String> {
        if self.server_name.is_empty() {
            Some(self.server_id.to_string())
        } else {
            Some(self.server_name.clone())
        }
    }

    fn summary(&self) -> String {
        if let Some(err) = &self.error {
            return format!("error: {err}");
        }
        format!(
            "cpu {} | mem {} | disk r/w {}/{} B/s | net rx/tx {}/{} B/s",
            opt(self.cpu_percent, "%"),
            opt(self.memory_percent, "%"),
            opt(self.disk_read_bytes_per_sec, ""),
            opt(self.disk_write_bytes_per_sec, ""),
            opt(self.network_recv_bytes_per_sec, ""),
            opt(self.network_sent_bytes_per_sec, ""),
        )
    }
}

/// Latest rendered point of every series, one line each.
///
/// Each line is `(label, summary, retained sample count)`.
pub fn summary_lines<S: Sample + SummaryLine>(
    snapshot: &SeriesSnapshot<S>,
    options: ChartOptions,
) -> Vec<(Option<String>, String, usize)> {
    chart_series(snapshot, options)
        .into_iter()
        .filter_map(|(key, points)| {
            let retained = snapshot.get(&key).map_or(0, |seq| seq.len());
            points
                .last()
                .map(|latest| (latest.label(), latest.summary(), retained))
        })
        .collect()
}
