use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::bus::Message;
use crate::{Error, EventStore};

/// Why a filter stopped a message.
#[derive(Debug)]
pub enum Rejection {
    /// The message is released back to the queue, to be delivered again.
    Nack,
    /// The message is acknowledged without being published.
    Ack,
    /// The filter failed: the message is left alone and redelivered when its reservation expires.
    Failed(Error),
}

/// A step of the dispatcher filter chain.
///
/// Filters run in order before a message is published. The first rejection stops the chain and
/// decides what happens to the message.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Lets the message through or rejects it.
    async fn filter(&self, message: &Message) -> Result<(), Rejection>;
}

/// Releases every message whose event type is not allowed.
#[derive(Debug, Clone)]
pub struct EventTypeFilter {
    allowed: BTreeSet<String>,
}

impl EventTypeFilter {
    /// Allows the given event types.
    pub fn new<T>(allowed: impl IntoIterator<Item = T>) -> Self
    where
        T: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Filter for EventTypeFilter {
    async fn filter(&self, message: &Message) -> Result<(), Rejection> {
        if self.allowed.contains(&message.event().event_type) {
            Ok(())
        } else {
            log::debug!(
                "Event type {} not allowed, releasing message {}",
                message.event().event_type,
                message.receipt()
            );
            Err(Rejection::Nack)
        }
    }
}

/// Refreshes an event store before a message is published, so that handlers querying the store
/// observe the event.
pub struct RefreshFilter {
    store: Arc<dyn EventStore>,
}

impl RefreshFilter {
    /// Refreshes `store`.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Filter for RefreshFilter {
    async fn filter(&self, _message: &Message) -> Result<(), Rejection> {
        self.store.refresh().await.map_err(Rejection::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Header;
    use crate::store::{MemoryBackend, TableEventStore};
    use crate::Event;

    fn message(event_type: &str) -> Message {
        let event = Event {
            id: "p1".into(),
            version: 1,
            event_type: event_type.into(),
            timestamp: 0,
            data: None,
            snapshot: None,
        };
        Message::new(1, Header::new(), event)
    }

    #[tokio::test]
    async fn allowed_types_pass() {
        let filter = EventTypeFilter::new(["PollOpened", "PollClosed"]);

        assert!(filter.filter(&message("PollClosed")).await.is_ok());
        assert!(matches!(
            filter.filter(&message("BallotCast")).await,
            Err(Rejection::Nack)
        ));
    }

    #[tokio::test]
    async fn refresh_makes_foreign_writes_visible() {
        let backend = MemoryBackend::new();
        let writer = TableEventStore::open(backend.clone()).await.unwrap();
        let reader = Arc::new(TableEventStore::open(backend).await.unwrap());
        writer
            .put("p1", 0, message("PollCreated").event().clone())
            .await
            .unwrap();
        let filter = RefreshFilter::new(reader.clone());

        filter.filter(&message("PollCreated")).await.unwrap();

        assert_eq!(reader.query("p1").await.unwrap().len(), 1);
    }
}
