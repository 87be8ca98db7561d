use std::sync::Arc;

use crate::{Aggregate, Command, Error, EventManager, EventStore, Events, Existence};

/// Executes [commands](Command) against an event store and publishes the resulting events.
///
/// A command execution queries the events of its aggregate, loads the aggregate, lets the command
/// mutate it, commits the emitted events, then publishes them to the event manager in commit
/// order. Subscribers therefore only ever see committed events.
#[derive(Clone)]
pub struct CommandBus {
    store: Arc<dyn EventStore>,
    manager: EventManager,
}

impl CommandBus {
    /// Creates a command bus writing to `store` and publishing to `manager`.
    pub fn new(store: Arc<dyn EventStore>, manager: EventManager) -> Self {
        Self { store, manager }
    }

    /// The event store commands are executed against.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Executes a command and returns the committed events.
    ///
    /// A version conflict is returned as is: the caller may execute the command again, which
    /// reloads the aggregate.
    pub async fn execute<C: Command>(&self, command: C) -> Result<Events, Error> {
        let id = command.aggregate_id();
        let history = self.store.query(id).await?;
        match (command.existence(), history.is_empty()) {
            (Existence::New, false) => return Err(Error::AlreadyExists(id.to_string())),
            (Existence::Existing, true) => return Err(Error::NotFound(id.to_string())),
            _ => {}
        }

        let mut aggregate = C::Aggregate::load(id, history)?;
        command.execute(&mut aggregate)?;
        let events = aggregate.root_mut().flush();
        if events.is_empty() {
            log::debug!("{} on {id} emitted no event", C::NAME);
            return Ok(events);
        }

        aggregate
            .root_mut()
            .commit(self.store.as_ref(), &events)
            .await?;
        log::info!(
            "{} committed {} events on {id}, now at version {}",
            C::NAME,
            events.len(),
            aggregate.root().version,
        );

        // Committed events are never reported as a failure.
        for event in &events {
            if let Err(error) = self.manager.publish(event.clone()) {
                log::error!(
                    "Failed to publish {} version {} of {id}: {error}",
                    event.event_type,
                    event.version,
                );
            }
        }

        if command.snapshot() {
            if let Err(error) = self.attach_snapshot(&aggregate, &events).await {
                log::warn!("Failed to snapshot {id}: {error}");
            }
        }

        Ok(events)
    }

    async fn attach_snapshot<A: Aggregate>(&self, aggregate: &A, events: &Events) -> Result<(), Error> {
        let Some(last) = events.last() else {
            return Ok(());
        };
        match self.store.snapshot(last, aggregate.snapshot()?).await {
            Err(Error::SnapshotUnsupported) => {
                log::debug!("Snapshots unsupported, {} not snapshotted", last.id);
                Ok(())
            }
            result => result,
        }
    }
}
