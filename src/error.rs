//! Crate-level error type.
//!
//! Most failures in the stream path are soft: a failed historical fetch is
//! treated as "no history", a broken socket only flips the connectivity flag.
//! `StreamError` is what those soft paths log, and what the configuration
//! loader and the CLI propagate with `?`.

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors produced by configuration loading, the HTTP backfill client and the
/// STOMP transport.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A configuration value failed validation.
    #[error("invalid configuration: {details}")]
    Config { details: String },

    /// An explicitly requested configuration file does not exist.
    #[error("missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    /// The configuration file is not valid TOML for [`crate::config::LoadwatchConfig`].
    #[error("configuration parse failure in {path}: {details}")]
    ConfigParse { path: PathBuf, details: String },

    #[error("IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend replied with a non-2xx status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A TCP or WebSocket connection could not be established.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// A payload could not be decoded into the expected shape.
    #[error("decode error in {context}: {detail}")]
    Decode {
        context: &'static str,
        detail: String,
    },

    /// The peer violated the STOMP protocol or sent an `ERROR` frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl StreamError {
    pub(crate) fn config(details: impl Into<String>) -> Self {
        StreamError::Config {
            details: details.into(),
        }
    }

    pub(crate) fn decode(context: &'static str, err: impl std::fmt::Display) -> Self {
        StreamError::Decode {
            context,
            detail: err.to_string(),
        }
    }
}
