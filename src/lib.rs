//! Real-time metrics stream aggregation for load-test dashboards.
//!
//! Samples arrive on a STOMP push channel per test run, are merged with a
//! one-shot historical backfill, kept strictly time-ordered and bounded, and
//! are smoothed and downsampled only when rendered.

pub mod aggregator;
pub mod backfill;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod history;
pub mod merge;
pub mod sample;
pub mod sequence;
pub mod smooth;
pub mod status;
pub mod stomp;
pub mod subscription;
pub mod transport;

pub use aggregator::{Aggregator, AggregatorSettings};
pub use backfill::{BackendClient, BackendClientBuilder, BackendConfig, HistorySource};
pub use config::LoadwatchConfig;
pub use error::{Result, StreamError};
pub use history::CapPolicy;
pub use sample::{
    BrowserSample, HostId, InfraSample, LoadSample, MetricFamily, RunKind, Sample, SubjectId,
    SubjectStatus,
};
pub use sequence::{SampleSequence, SeriesSnapshot};
pub use status::{RunStatus, StatusEvent, StatusFeed};
pub use subscription::{StreamSubscription, SubscriptionState};
pub use transport::{ChannelEvent, StompSettings, StompTransport, TopicFeed, TopicSubscription, Transport};
