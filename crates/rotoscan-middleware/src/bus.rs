//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Publishing never blocks the scan pipeline: a slow subscriber
//! lags and loses the oldest events instead.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Cloud`] | The latest swept frame with its scan count and angle |
//! | [`Topic::Diagnostics`] | Difference detector signals (count, region start/end) |
//! | [`Topic::Session`] | Session lifecycle events such as finalization |
//!
//! # Example
//!
//! ```rust
//! use rotoscan_middleware::bus::{EventBus, Topic};
//! use rotoscan_types::{DiagnosticSignal, Event, EventPayload};
//!
//! let bus = EventBus::default();
//! let mut rx = bus.subscribe_to(Topic::Diagnostics);
//!
//! let event = Event::new("doc", EventPayload::Diagnostic(DiagnosticSignal::DiffCount(12)));
//! assert_eq!(bus.publish_to(Topic::Diagnostics, event).unwrap(), 1);
//! assert!(rx.try_recv().is_ok());
//! ```

use rotoscan_types::{Event, EventPayload, RotoError};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Swept frames, one event per accepted frame.
    Cloud,
    /// Difference detector signals.
    Diagnostics,
    /// Session lifecycle events.
    Session,
}

impl Topic {
    /// The topic an event payload is naturally routed to.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Cloud { .. } => Topic::Cloud,
            EventPayload::Diagnostic(_) => Topic::Diagnostics,
            EventPayload::SessionFinalized(_) => Topic::Session,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    cloud: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
    session: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (cloud, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        let (session, _) = broadcast::channel(capacity);
        Self {
            cloud,
            diagnostics,
            session,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when no subscribers are currently listening on the
    /// topic (this is a normal condition, not an error).
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, RotoError> {
        let sender = self.topic_sender(topic);
        if sender.receiver_count() == 0 {
            trace!(?topic, "no subscribers, event dropped");
            return Ok(0);
        }
        sender
            .send(event)
            .map_err(|e| RotoError::Channel(format!("event bus send error on {topic:?}: {e}")))
    }

    /// Publish `event` to the topic derived from its payload.
    pub fn publish(&self, event: Event) -> Result<usize, RotoError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Cloud => &self.cloud,
            Topic::Diagnostics => &self.diagnostics,
            Topic::Session => &self.session,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, for synchronous callers.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
