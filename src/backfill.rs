//! Historical backfill over the dashboard's REST API.
//!
//! ## Responsibility
//! Fetch the persisted samples of a subject (used for startup backfill and
//! for the final snapshot once a run ends) and look up a run's status.
//!
//! ## Guarantees
//! - Never panics; every failure is a [`StreamError`] the caller may log and
//!   treat as "no history"
//! - Request and connect timeouts are bounded by [`BackendConfig`]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::LoadwatchConfig;
use crate::error::{Result, StreamError};
use crate::sample::{RunKind, Sample, SubjectId};
use crate::status::RunStatus;

/// Source of persisted samples for one family.
pub trait HistorySource<S: Sample>: Send + Sync + 'static {
    /// Every persisted sample of `subject`, in producer order.
    fn fetch(&self, subject: SubjectId) -> impl Future<Output = Result<Vec<S>>> + Send;
}

impl<S: Sample, H: HistorySource<S>> HistorySource<S> for Arc<H> {
    fn fetch(&self, subject: SubjectId) -> impl Future<Output = Result<Vec<S>>> + Send {
        (**self).fetch(subject)
    }
}

/// Connection settings of a [`BackendClient`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the dashboard API (e.g. `http://127.0.0.1:8080`).
    pub base_url: String,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Kind of run being followed. Only matters for families collected on
    /// either kind (infra).
    pub run_kind: RunKind,
}

impl BackendConfig {
    /// Defaults: connect timeout 3 s, request timeout 10 s.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            run_kind: RunKind::default(),
        }
    }

    pub fn from_config(cfg: &LoadwatchConfig) -> Self {
        Self {
            base_url: cfg.server.base_url.clone(),
            connect_timeout: cfg.server.connect_timeout(),
            request_timeout: cfg.server.request_timeout(),
            run_kind: RunKind::default(),
        }
    }
}

/// REST client for persisted metrics and run descriptors.
#[derive(Debug, Clone)]
pub struct BackendClient {
    config: BackendConfig,
    client: reqwest::Client,
}

/// The part of a run descriptor this crate reads.
#[derive(Debug, Deserialize)]
struct RunInfo {
    status: RunStatus,
}

impl BackendClient {
    pub fn builder(base_url: impl Into<String>) -> BackendClientBuilder {
        BackendClientBuilder::new(base_url)
    }

    pub fn from_config(cfg: &LoadwatchConfig) -> Self {
        BackendClientBuilder::from_config(cfg).build()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET `path` and decode the JSON body as `T`.
    ///
    /// # Returns
    /// - `Err(StreamError::Connect)` when the request cannot be sent
    /// - `Err(StreamError::Http)` on a non-2xx reply
    /// - `Err(StreamError::Decode)` when the body is not the expected shape
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        context: &'static str,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StreamError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(StreamError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StreamError::decode(context, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StreamError::decode(context, e))
    }

    /// Persisted samples of `subject` for the family of `S`.
    pub async fn fetch_samples<S: Sample>(&self, subject: SubjectId) -> Result<Vec<S>> {
        let samples: Vec<S> = self
            .get_json(&S::FAMILY.history_path(self.config.run_kind, subject), "history")
            .await?;
        debug!(
            family = %S::FAMILY,
            run = %S::FAMILY.run_kind(self.config.run_kind),
            %subject,
            count = samples.len(),
            "history fetched"
        );
        Ok(samples)
    }

    /// Current status of run `subject`, a run of kind `run`.
    pub async fn fetch_run_status(&self, run: RunKind, subject: SubjectId) -> Result<RunStatus> {
        let info: RunInfo = self.get_json(&run.run_path(subject), "run").await?;
        Ok(info.status)
    }
}

impl<S: Sample> HistorySource<S> for BackendClient {
    fn fetch(&self, subject: SubjectId) -> impl Future<Output = Result<Vec<S>>> + Send {
        self.fetch_samples::<S>(subject)
    }
}

/// Builder for [`BackendClient`].
#[derive(Debug, Clone)]
pub struct BackendClientBuilder {
    config: BackendConfig,
}

impl BackendClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: BackendConfig::new(base_url),
        }
    }

    pub fn from_config(cfg: &LoadwatchConfig) -> Self {
        Self {
            config: BackendConfig::from_config(cfg),
        }
    }

    /// Kind of run the subject is (default [`RunKind::Load`]).
    pub fn run_kind(mut self, run: RunKind) -> Self {
        self.config.run_kind = run;
        self
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the per-request timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> BackendClient {
        // Falls back to a default client rather than panicking if the TLS
        // backend cannot be initialised.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();
        BackendClient {
            config: self.config,
            client,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
