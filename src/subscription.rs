//! Stream subscription lifecycle and connectivity flag.
//!
//! ```text
//! Idle ──open──▶ Connecting ──Connected──▶ Connected
//!                    │                       ▲   │
//!              Disconnected           Connected  Disconnected
//!                    ▼                       │   ▼
//!                Reconnecting ◀──────────────┴───┘
//!  any ──close──▶ Closed
//! ```
//!
//! The transport owns the retry loop; this type only tracks where the channel
//! is and publishes the connectivity flag. Events are pumped by a forwarder
//! task that is aborted on close, so nothing is delivered after teardown.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::transport::{ChannelEvent, Transport};

/// Where a subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::Connecting => "connecting",
            SubscriptionState::Connected => "connected",
            SubscriptionState::Reconnecting => "reconnecting",
            SubscriptionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// One live-channel subscription for the currently observed subject.
#[derive(Debug)]
pub struct StreamSubscription {
    state: SubscriptionState,
    topic: Option<String>,
    connected: watch::Sender<bool>,
    forwarder: Option<JoinHandle<()>>,
}

impl Default for StreamSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSubscription {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            state: SubscriptionState::Idle,
            topic: None,
            connected,
            forwarder: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Receiver of the connectivity flag. Survives re-opens.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Close any previous channel and subscribe to `topic`.
    ///
    /// Every event is handed to `deliver` from a forwarder task; the caller
    /// routes it back to whoever owns the state and then calls
    /// [`on_event`](Self::on_event). `deliver` returning `false` stops the
    /// forwarder.
    pub fn open<T, F>(&mut self, transport: &T, topic: &str, deliver: F)
    where
        T: Transport + ?Sized,
        F: Fn(ChannelEvent) -> bool + Send + 'static,
    {
        self.close();
        let mut subscription = transport.subscribe(topic);
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = subscription.next_event().await {
                if !deliver(event) {
                    break;
                }
            }
            subscription.close();
        }));
        self.topic = Some(topic.to_string());
        self.state = SubscriptionState::Connecting;
        debug!(%topic, "subscription opening");
    }

    /// Apply a channel event to the state machine.
    ///
    /// Returns the payload for [`ChannelEvent::Message`]. Events arriving
    /// while idle or closed are ignored.
    pub fn on_event(&mut self, event: ChannelEvent) -> Option<String> {
        if matches!(self.state, SubscriptionState::Idle | SubscriptionState::Closed) {
            return None;
        }
        match event {
            ChannelEvent::Connected => {
                self.state = SubscriptionState::Connected;
                self.connected.send_replace(true);
                None
            }
            ChannelEvent::Disconnected => {
                self.state = SubscriptionState::Reconnecting;
                self.connected.send_replace(false);
                None
            }
            ChannelEvent::Message(body) => Some(body),
        }
    }

    /// Tear down the channel. No event is delivered afterwards.
    pub fn close(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.state != SubscriptionState::Idle {
            self.state = SubscriptionState::Closed;
        }
        self.connected.send_replace(false);
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
