use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::unix_now;
use crate::{DomainEvent, Error, Event, EventStore, Events, Payload};

/// The part of an aggregate that event streams are partitioned on.
///
/// Holds the aggregate id, the version of the last committed event, and the events emitted since
/// the aggregate was loaded. It is owned by the code path executing a command and is never shared
/// between concurrent mutators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRoot {
    /// The aggregate id.
    pub id: String,
    /// The version of the last committed event, 0 for an aggregate without events.
    pub version: i64,
    #[serde(skip)]
    pending: Events,
}

impl AggregateRoot {
    /// Creates a root for an aggregate without events.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            pending: Events::new(),
        }
    }

    /// The events emitted since the last [flush](Self::flush).
    pub fn pending(&self) -> &Events {
        &self.pending
    }

    /// Serializes a domain event and adds it to the current transaction.
    pub fn emit<E: DomainEvent>(&mut self, event: &E) -> Result<(), Error> {
        self.emit_event(Event::from_domain(event)?);
        Ok(())
    }

    /// Adds a record to the current transaction, assigning the aggregate id, the next version and
    /// the current time.
    pub fn emit_event(&mut self, mut event: Event) {
        let tail = self.pending.last_version();
        event.id = self.id.clone();
        event.version = tail.max(self.version) + 1;
        event.timestamp = unix_now();
        self.pending.push(event);
    }

    /// Takes the pending events, leaving the transaction empty. The caller is responsible for
    /// committing them.
    pub fn flush(&mut self) -> Events {
        std::mem::take(&mut self.pending)
    }

    /// Writes flushed events to an event store, each one claiming the version of the event before
    /// it. On success the committed version advances to the last event. On failure the committed
    /// version is left untouched and the error is returned.
    pub async fn commit<S>(&mut self, store: &S, events: &Events) -> Result<(), Error>
    where
        S: EventStore + ?Sized,
    {
        let mut version = self.version;
        for event in events {
            if let Err(error) = store.put(&self.id, version, event.clone()).await {
                log::warn!(
                    "Commit of {} stopped at version {version}, event version {}: {error}",
                    self.id,
                    event.version,
                );
                return Err(error);
            }
            version = event.version;
        }
        self.version = version;
        Ok(())
    }
}

/// An aggregate represents a business entity whose state is derived entirely from its own event
/// stream.
///
/// # Associated type
///
/// * [CreationEvent](Self::CreationEvent) - the event emitted when the aggregate is first created
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send {
    /// The event emitted when an aggregate is loaded from an empty stream.
    type CreationEvent: DomainEvent;

    /// Getter for the aggregate root.
    fn root(&self) -> &AggregateRoot;

    /// Mutable getter for the aggregate root.
    fn root_mut(&mut self) -> &mut AggregateRoot;

    /// Creates the creation event for a new aggregate.
    fn creation_event(id: &str) -> Self::CreationEvent;

    /// Applies a stored event to the aggregate state. Events the aggregate cannot interpret are
    /// skipped.
    fn apply(&mut self, event: &Event);

    /// Loads an aggregate from its events.
    ///
    /// An empty stream is a first-time creation: the returned aggregate carries the creation
    /// event in its pending events, so the first commit always includes it. Otherwise events are
    /// replayed in version order, starting from the latest snapshot if it can be decoded.
    fn load(id: &str, events: Events) -> Result<Self, Error> {
        let mut aggregate = Self::default();

        if events.is_empty() {
            aggregate.root_mut().id = id.to_string();
            aggregate.root_mut().emit(&Self::creation_event(id))?;
            return Ok(aggregate);
        }

        let events = events.sorted();
        let start = match restore::<Self>(&events) {
            Some((restored, position)) => {
                aggregate = restored;
                position + 1
            }
            None => 0,
        };

        for event in &events[start..] {
            aggregate.apply(event);
            aggregate.root_mut().version = event.version;
        }

        if aggregate.root().id.is_empty() {
            aggregate.root_mut().id = id.to_string();
        }

        Ok(aggregate)
    }

    /// Serializes the current state of the aggregate, to be attached to its last event.
    fn snapshot(&self) -> Result<Payload, Error> {
        Payload::encode(self)
    }
}

/// Restores an aggregate from the latest snapshot in `events`, returning it along with the
/// position of the snapshot event. A snapshot that cannot be decoded is ignored altogether.
fn restore<A: Aggregate>(events: &Events) -> Option<(A, usize)> {
    let (position, event) = events
        .iter()
        .enumerate()
        .rev()
        .find(|(_, event)| event.snapshot.is_some())?;
    let snapshot = event.snapshot.as_ref()?;

    match snapshot.decode::<A>() {
        Ok(mut aggregate) => {
            log::debug!(
                "Restored {} from snapshot at version {} of {} events",
                event.id,
                event.version,
                events.len(),
            );
            aggregate.root_mut().id = event.id.clone();
            aggregate.root_mut().version = event.version;
            Some((aggregate, position))
        }
        Err(error) => {
            log::warn!(
                "Failed to load {} from snapshot at version {}, replaying all events: {error}",
                event.id,
                event.version,
            );
            None
        }
    }
}
