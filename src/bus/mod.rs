//! The message bus contract: envelopes exchanged with an external queue, and the forwarder that
//! publishes local events to it.

mod memory;

pub use memory::{MemoryQueue, QueueSettings, QueueStats};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::{Error, Event, EventHandler, EventManager, Payload, Subscriber, Subscriptions};

/// Message attributes carried next to the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(pub BTreeMap<String, String>);

impl Header {
    /// Creates an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the header has no attribute.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Header {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Header {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The wire form of a message: `{"header": {...}, "body": <event>}`. An empty header is omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The message attributes.
    #[serde(default, skip_serializing_if = "Header::is_empty")]
    pub header: Header,
    /// The serialized event.
    pub body: Payload,
}

impl Envelope {
    /// Wraps an event.
    pub fn seal(event: &Event, header: Header) -> Result<Self, Error> {
        Ok(Self {
            header,
            body: Payload::encode(event)?,
        })
    }

    /// Extracts the event.
    pub fn open(&self) -> Result<Event, Error> {
        self.body.decode()
    }

    /// Serializes the envelope.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes an envelope.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A message received from a [MessageQueue], reserved until it is acknowledged or released.
#[derive(Debug, Clone)]
pub struct Message {
    receipt: u64,
    header: Header,
    event: Event,
}

impl Message {
    /// Creates a message reserved under `receipt`.
    pub fn new(receipt: u64, header: Header, event: Event) -> Self {
        Self {
            receipt,
            header,
            event,
        }
    }

    /// The reservation receipt.
    pub fn receipt(&self) -> u64 {
        self.receipt
    }

    /// The message attributes.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The carried event.
    pub fn event(&self) -> &Event {
        &self.event
    }
}

/// An external message queue with reservation semantics.
///
/// A received message is hidden from other receivers until it is acknowledged, released, or its
/// reservation expires.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Waits for the next message. Returns `None` when the wait ended without a message.
    async fn receive(&self) -> Result<Option<Message>, Error>;

    /// Deletes a received message.
    async fn ack(&self, message: &Message) -> Result<(), Error>;

    /// Releases a received message so that it is delivered again after a delay.
    async fn nack(&self, message: &Message) -> Result<(), Error>;

    /// Sends an event.
    async fn send(&self, event: &Event) -> Result<(), Error>;
}

struct Forward {
    queue: Arc<dyn MessageQueue>,
}

#[async_trait]
impl EventHandler for Forward {
    async fn handle(&self, event: &Event) -> Result<(), Error> {
        self.queue.send(event).await
    }
}

/// Sends events published locally to a [MessageQueue].
pub struct Forwarder {
    queue: Arc<dyn MessageQueue>,
    event_types: Vec<String>,
    subscriptions: Subscriptions,
}

impl Forwarder {
    /// Creates a forwarder of the given event types.
    pub fn new<T>(queue: Arc<dyn MessageQueue>, event_types: impl IntoIterator<Item = T>) -> Self
    where
        T: Into<String>,
    {
        Self {
            queue,
            event_types: event_types.into_iter().map(Into::into).collect(),
            subscriptions: Subscriptions::new(),
        }
    }
}

#[async_trait]
impl Subscriber for Forwarder {
    async fn subscribe(&self, manager: &EventManager) -> Result<(), Error> {
        let handler: Arc<dyn EventHandler> = Arc::new(Forward {
            queue: self.queue.clone(),
        });
        let mut subscriptions = Vec::with_capacity(self.event_types.len());
        for event_type in &self.event_types {
            subscriptions.push(manager.subscribe(event_type.clone(), handler.clone()).await?);
        }
        log::info!("Forwarding {} to the message queue", self.event_types.join(", "));
        self.subscriptions.bind(manager, subscriptions).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.subscriptions.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event {
            id: "p1".into(),
            version: 3,
            event_type: "PollOpened".into(),
            timestamp: 1486332455,
            data: Some(Payload::from_json(r#"{"id": "p1"}"#).unwrap()),
            snapshot: None,
        }
    }

    #[test]
    fn empty_header_is_omitted() {
        let envelope = Envelope::seal(&event(), Header::new()).unwrap();

        let json = envelope.to_json().unwrap();

        assert!(json.starts_with(r#"{"body":{"id":"p1""#));
        assert_eq!(Envelope::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn envelope_keeps_the_event_data_bytes() {
        let mut header = Header::new();
        header.insert("origin".into(), "commands".into());
        let envelope = Envelope::seal(&event(), header).unwrap();

        let decoded = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(decoded.header.get("origin").map(String::as_str), Some("commands"));
        assert_eq!(
            decoded.open().unwrap().data.unwrap().as_str(),
            r#"{"id": "p1"}"#
        );
    }

    #[tokio::test]
    async fn forwarder_sends_subscribed_types() {
        let queue = Arc::new(MemoryQueue::new(QueueSettings::immediate()));
        let manager = EventManager::new();
        let forwarder = Forwarder::new(queue.clone(), ["PollOpened"]);
        forwarder.subscribe(&manager).await.unwrap();

        manager.publish(event()).unwrap();
        let mut other = event();
        other.event_type = "BallotCast".into();
        manager.publish(other).unwrap();
        manager.close().await.unwrap();

        assert_eq!(queue.stats().await.ready, 1);
        let message = queue.receive().await.unwrap().unwrap();
        assert_eq!(message.event(), &event());
    }

    #[tokio::test]
    async fn closed_forwarder_stops_sending() {
        let queue = Arc::new(MemoryQueue::new(QueueSettings::immediate()));
        let manager = EventManager::new();
        let forwarder = Forwarder::new(queue.clone(), ["PollOpened"]);
        forwarder.subscribe(&manager).await.unwrap();

        forwarder.close().await.unwrap();
        manager.publish(event()).unwrap();
        manager.close().await.unwrap();

        assert_eq!(queue.stats().await.ready, 0);
    }
}
