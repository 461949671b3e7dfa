//! Push transport capability and its STOMP-over-WebSocket implementation.
//!
//! The aggregator only sees the [`Transport`] trait: `subscribe(topic)` hands
//! back a [`TopicSubscription`] that yields [`ChannelEvent`]s one at a time and
//! is torn down with `close()` (or by dropping it). Whether topics share one
//! physical connection is the transport's business.
//!
//! [`StompTransport`] opens one WebSocket session per topic and keeps it alive
//! with a fixed-delay reconnect loop that never gives up; only closing the
//! subscription stops it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::LoadwatchConfig;
use crate::error::{Result, StreamError};
use crate::stomp::{Command, Frame};

/// What a topic subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is established and the topic subscribed.
    Connected,
    /// The channel dropped; the transport is retrying.
    Disconnected,
    /// One message body published on the topic.
    Message(String),
}

/// Consumer end of one topic subscription.
///
/// After [`close`](Self::close) no further event is returned, even if some
/// were already queued.
#[derive(Debug)]
pub struct TopicSubscription {
    topic: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: bool,
}

/// Producer end of a [`TopicSubscription`], held by the transport.
#[derive(Debug, Clone)]
pub struct TopicFeed {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl TopicSubscription {
    /// Create a linked subscription/feed pair for `topic`.
    pub fn pair(topic: impl Into<String>) -> (TopicSubscription, TopicFeed) {
        let (tx, events) = mpsc::unbounded_channel();
        (
            TopicSubscription {
                topic: topic.into(),
                events,
                closed: false,
            },
            TopicFeed { tx },
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event, or `None` once closed (locally or by the transport).
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Stop the subscription. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.events.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl TopicFeed {
    /// Deliver an event. Returns `false` once the consumer has gone away.
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer closes or drops its end.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// A push channel able to deliver per-topic message streams.
pub trait Transport: Send + Sync + 'static {
    /// Start delivering `topic`. Must be called inside a Tokio runtime.
    fn subscribe(&self, topic: &str) -> TopicSubscription;
}

impl<T: Transport> Transport for Arc<T> {
    fn subscribe(&self, topic: &str) -> TopicSubscription {
        (**self).subscribe(topic)
    }
}

// ---------------------------------------------------------------------------
// STOMP over WebSocket
// ---------------------------------------------------------------------------

/// Subscription id used inside each per-topic session.
const SUBSCRIPTION_ID: &str = "sub-0";

/// Settings of a [`StompTransport`].
#[derive(Debug, Clone)]
pub struct StompSettings {
    /// WebSocket endpoint of the broker (e.g. `ws://host:8080/ws/websocket`).
    pub ws_url: String,
    /// Value of the STOMP `host` header.
    pub host: String,
    pub connect_timeout: Duration,
    /// Fixed wait between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl StompSettings {
    pub fn new(ws_url: impl Into<String>) -> Self {
        let ws_url = ws_url.into();
        let host = ws_url
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            ws_url,
            host,
            connect_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn from_config(cfg: &LoadwatchConfig) -> Self {
        Self {
            connect_timeout: cfg.server.connect_timeout(),
            reconnect_delay: cfg.stream.reconnect_delay(),
            ..Self::new(cfg.server.ws_url.clone())
        }
    }
}

/// STOMP 1.2 subscriber over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct StompTransport {
    settings: Arc<StompSettings>,
}

impl StompTransport {
    pub fn new(settings: StompSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &StompSettings {
        &self.settings
    }
}

impl Transport for StompTransport {
    fn subscribe(&self, topic: &str) -> TopicSubscription {
        let (subscription, feed) = TopicSubscription::pair(topic);
        let settings = Arc::clone(&self.settings);
        let topic = topic.to_string();
        tokio::spawn(async move {
            run_topic(settings, topic, feed).await;
        });
        subscription
    }
}

/// How a session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The consumer closed the subscription.
    Closed,
    /// The broker or network closed the socket.
    Dropped,
}

/// Reconnect loop for one topic. Runs until the consumer closes.
async fn run_topic(settings: Arc<StompSettings>, topic: String, feed: TopicFeed) {
    let mut attempts: u64 = 0;
    loop {
        if feed.is_closed() {
            break;
        }
        attempts = attempts.saturating_add(1);

        match session(&settings, &topic, &feed).await {
            Ok(SessionEnd::Closed) => break,
            Ok(SessionEnd::Dropped) => {
                info!(%topic, attempts, "stomp session dropped, reconnecting");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    %topic,
                    url = %settings.ws_url,
                    attempts,
                    "stomp session failed, will retry"
                );
            }
        }
        if !feed.send(ChannelEvent::Disconnected) {
            break;
        }

        tokio::select! {
            _ = feed.closed() => break,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }
    debug!(%topic, "stomp subscription closed");
}

/// One connect → subscribe → receive session.
///
/// Every wait races the consumer closing, so a close is always observed
/// here and an established session can say goodbye to the broker.
async fn session(settings: &StompSettings, topic: &str, feed: &TopicFeed) -> Result<SessionEnd> {
    let connect = tokio_tungstenite::connect_async(settings.ws_url.as_str());
    let connected = tokio::select! {
        _ = feed.closed() => return Ok(SessionEnd::Closed),
        connected = tokio::time::timeout(settings.connect_timeout, connect) => connected,
    };
    let (ws, _response) = connected
        .map_err(|_| StreamError::Connect {
            url: settings.ws_url.clone(),
            detail: format!("timed out after {:?}", settings.connect_timeout),
        })?
        .map_err(|e| StreamError::Connect {
            url: settings.ws_url.clone(),
            detail: e.to_string(),
        })?;
    let (mut sink, mut stream) = ws.split();

    sink.send(WsMessage::Text(Frame::connect(&settings.host).encode()))
        .await?;

    // Handshake: wait for CONNECTED.
    loop {
        let msg = tokio::select! {
            _ = feed.closed() => return Ok(SessionEnd::Closed),
            msg = stream.next() => msg,
        };
        let Some(msg) = msg else {
            return Err(StreamError::Protocol("socket closed during handshake".into()));
        };
        let Some(text) = message_text(msg?) else {
            continue;
        };
        let frames = Frame::decode_all(&text)?;
        if let Some(err) = frames.iter().find(|f| f.command == Command::Error) {
            return Err(error_frame(err));
        }
        if frames.iter().any(|f| f.command == Command::Connected) {
            break;
        }
    }

    sink.send(WsMessage::Text(Frame::subscribe(SUBSCRIPTION_ID, topic).encode()))
        .await?;
    if !feed.send(ChannelEvent::Connected) {
        return Ok(SessionEnd::Closed);
    }
    debug!(%topic, "stomp subscribed");

    loop {
        tokio::select! {
            _ = feed.closed() => {
                // Best effort: the socket is dropped right after either way.
                let goodbye = async {
                    sink.send(WsMessage::Text(Frame::unsubscribe(SUBSCRIPTION_ID).encode())).await?;
                    sink.send(WsMessage::Text(Frame::disconnect().encode())).await?;
                    sink.close().await
                };
                if let Err(e) = tokio::time::timeout(settings.connect_timeout, goodbye)
                    .await
                    .unwrap_or(Ok(()))
                {
                    debug!(error = %e, %topic, "stomp goodbye failed");
                }
                return Ok(SessionEnd::Closed);
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Dropped);
                };
                let msg = msg?;
                if matches!(msg, WsMessage::Close(_)) {
                    return Ok(SessionEnd::Dropped);
                }
                let Some(text) = message_text(msg) else {
                    continue;
                };
                for frame in Frame::decode_all(&text)? {
                    match frame.command {
                        Command::Message => {
                            if !feed.send(ChannelEvent::Message(frame.body)) {
                                return Ok(SessionEnd::Closed);
                            }
                        }
                        Command::Error => return Err(error_frame(&frame)),
                        _ => {}
                    }
                }
            }
        }
    }
}

fn message_text(msg: WsMessage) -> Option<String> {
    match msg {
        WsMessage::Text(text) => Some(text),
        WsMessage::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

fn error_frame(frame: &Frame) -> StreamError {
    let message = frame.get("message").unwrap_or("ERROR frame");
    if frame.body.is_empty() {
        StreamError::Protocol(message.to_string())
    } else {
        StreamError::Protocol(format!("{message}: {}", frame.body))
    }
}
