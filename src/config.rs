//! Configuration: TOML file + environment overrides + reference defaults.
//!
//! Every tuning knob of the stream path lives here (buffer cap, recent-window
//! fraction, smoothing window, display point budget, reconnect delay) so that
//! none of them is hard-coded at a call site.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::history::CapPolicy;

/// Environment variable overriding [`ServerConfig::base_url`].
pub const ENV_BASE_URL: &str = "LOADWATCH_BASE_URL";
/// Environment variable overriding [`ServerConfig::ws_url`].
pub const ENV_WS_URL: &str = "LOADWATCH_WS_URL";

/// Full configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadwatchConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub buffer: BufferConfig,
    pub display: DisplayConfig,
}

/// Where the dashboard backend lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the REST API (e.g. `http://localhost:8080`).
    pub base_url: String,
    /// STOMP-over-WebSocket endpoint.
    pub ws_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080/ws/websocket".to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live channel behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Fixed delay between reconnect attempts. Retries never give up.
    pub reconnect_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Retained-buffer bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum retained samples per series.
    pub max_samples: usize,
    /// Share of `max_samples` kept at full resolution at the recent end.
    pub recent_fraction: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_samples: 600,
            recent_fraction: 0.2,
        }
    }
}

impl BufferConfig {
    pub fn cap_policy(&self) -> CapPolicy {
        CapPolicy::new(self.max_samples, self.recent_fraction)
    }
}

/// Render-time transforms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Moving-average window, in samples.
    pub smoothing_window: usize,
    /// Maximum points handed to the chart.
    pub max_points: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 3,
            max_points: 300,
        }
    }
}

impl LoadwatchConfig {
    /// Load configuration.
    ///
    /// With `Some(path)` the file must exist; with `None` the reference
    /// defaults are used. Environment overrides are applied afterwards and the
    /// result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(StreamError::MissingConfig {
                        path: path.to_path_buf(),
                    });
                }
                let raw = fs::read_to_string(path).map_err(|source| StreamError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw).map_err(|e| match e {
                    StreamError::ConfigParse { details, .. } => StreamError::ConfigParse {
                        path: path.to_path_buf(),
                        details,
                    },
                    other => other,
                })?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| StreamError::ConfigParse {
            path: "<inline>".into(),
            details: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_nonempty(ENV_BASE_URL) {
            self.server.base_url = url;
        }
        if let Some(url) = env_nonempty(ENV_WS_URL) {
            self.server.ws_url = url;
        }
    }

    /// Reject knob combinations the buffer and display transforms cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.buffer.max_samples == 0 {
            return Err(StreamError::config("buffer.max_samples must be > 0"));
        }
        if !(0.0..1.0).contains(&self.buffer.recent_fraction) {
            return Err(StreamError::config(format!(
                "buffer.recent_fraction must be in [0, 1), got {}",
                self.buffer.recent_fraction
            )));
        }
        if self.display.smoothing_window == 0 {
            return Err(StreamError::config("display.smoothing_window must be >= 1"));
        }
        if self.server.base_url.trim().is_empty() {
            return Err(StreamError::config("server.base_url must not be empty"));
        }
        if self.server.ws_url.trim().is_empty() {
            return Err(StreamError::config("server.ws_url must not be empty"));
        }
        Ok(())
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}
