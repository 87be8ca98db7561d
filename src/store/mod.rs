//! The event store: a durable, queryable log of events keyed by aggregate id.

mod backend;

pub use backend::{Backend, FileBackend, MemoryBackend};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::{Error, Event, Events, Payload};

/// Component that manages system events.
///
/// Writes are checked with optimistic concurrency: [put](Self::put) only accepts the event that
/// directly follows the last stored version of the aggregate. The check detects lost updates from
/// concurrent commands on the same aggregate; it does not queue conflicting writers.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns every event of an aggregate, ascending by version. An empty result means the
    /// aggregate does not exist yet.
    async fn query(&self, id: &str) -> Result<Events, Error>;

    /// Returns every event of a given type across all aggregates, ascending by id and version.
    async fn query_by_event_type(&self, event_type: &str) -> Result<Events, Error>;

    /// Appends an event to the stream of `id`, provided that `expected` is the last version
    /// stored for `id` (0 for an aggregate without events).
    async fn put(&self, id: &str, expected: i64, event: Event) -> Result<(), Error>;

    /// Forces the store to observe the authoritative state before the next query. Stores that are
    /// always consistent do nothing.
    async fn refresh(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Attaches a materialized state of the aggregate to a stored event.
    async fn snapshot(&self, _event: &Event, _snapshot: Payload) -> Result<(), Error> {
        Err(Error::SnapshotUnsupported)
    }
}

/// Checks that `event` may be appended after the `stored` version of aggregate `id`, when the
/// writer claims the prior version is `expected`.
///
/// The event must carry exactly `expected + 1`: a version equal to or lower than the claimed one,
/// or one that leaves a gap, is a conflict, as is a claim that does not match the stored version.
pub fn check_version(id: &str, expected: i64, stored: i64, event: &Event) -> Result<(), Error> {
    if event.id != id {
        return Err(Error::AggregateMismatch {
            id: id.to_string(),
            event_id: event.id.clone(),
        });
    }
    if stored != expected || event.version != expected + 1 {
        return Err(Error::Conflict {
            id: id.to_string(),
            expected,
            stored,
            version: event.version,
        });
    }
    Ok(())
}

/// An [EventStore] over a table [Backend].
///
/// The records are cached in the process when the store is opened, and queries read the cache.
/// Writes reload the backend first, then check and append under a single lock, so a stale cache
/// never hides a version written by another store. Queries observe writes of other stores after
/// [refresh](EventStore::refresh) or the next write.
///
/// The table is append-only. A snapshot is appended as a copy of its event carrying the snapshot,
/// and loading merges it into the event with the same id and version.
pub struct TableEventStore<B> {
    backend: B,
    records: Mutex<Vec<Event>>,
}

impl<B: Backend> TableEventStore<B> {
    /// Opens a store, loading every record of the backend.
    pub async fn open(backend: B) -> Result<Self, Error> {
        let records = load(&backend).await?;
        log::debug!("Loaded {} events", records.len());
        Ok(Self {
            backend,
            records: Mutex::new(records),
        })
    }

    /// The backend of the store.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: Backend> EventStore for TableEventStore<B> {
    async fn query(&self, id: &str) -> Result<Events, Error> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|event| event.id == id)
            .cloned()
            .collect::<Events>()
            .sorted())
    }

    async fn query_by_event_type(&self, event_type: &str) -> Result<Events, Error> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect::<Events>()
            .sorted())
    }

    async fn put(&self, id: &str, expected: i64, event: Event) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        *records = load(&self.backend).await?;
        let stored = records
            .iter()
            .filter(|record| record.id == id)
            .map(|record| record.version)
            .max()
            .unwrap_or(0);
        check_version(id, expected, stored, &event)?;

        self.backend.append(&event).await?;
        records.push(event);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), Error> {
        let fresh = load(&self.backend).await?;
        let mut records = self.records.lock().await;
        log::debug!("Refreshed event store: {} -> {} events", records.len(), fresh.len());
        *records = fresh;
        Ok(())
    }

    async fn snapshot(&self, event: &Event, snapshot: Payload) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        *records = load(&self.backend).await?;
        let record = records
            .iter_mut()
            .find(|record| record.id == event.id && record.version == event.version)
            .ok_or_else(|| Error::EventNotFound {
                id: event.id.clone(),
                version: event.version,
            })?;
        let mut attached = record.clone();
        attached.snapshot = Some(snapshot);
        self.backend.append(&attached).await?;
        *record = attached;
        Ok(())
    }
}

/// Reads the records of a backend, merging snapshot records into the events they belong to.
async fn load<B: Backend>(backend: &B) -> Result<Vec<Event>, Error> {
    let mut records: Vec<Event> = Vec::new();
    let mut positions = HashMap::new();
    for record in backend.scan().await? {
        let key = (record.id.clone(), record.version);
        match positions.get(&key) {
            Some(&position) if record.snapshot.is_some() => {
                let existing: &mut Event = &mut records[position];
                existing.snapshot = record.snapshot;
            }
            Some(_) => log::warn!(
                "Ignoring duplicate record {} version {}",
                record.id,
                record.version
            ),
            None => {
                positions.insert(key, records.len());
                records.push(record);
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &str = r#"{"id":"id","version":1,"type":"NewItem","timestamp":1486332029,"data":{"foo":"bar"}}
{"id":"id","version":2,"type":"NewItem","timestamp":1486332324,"data":{"foo":"bar"}}
{"id":"other","version":1,"type":"OtherItem","timestamp":1486332330,"data":null}
{"id":"id","version":3,"type":"NewItem","timestamp":1486332354,"data":{"foo":"bar"}}
"#;

    fn event(id: &str, version: i64, event_type: &str) -> Event {
        Event {
            id: id.into(),
            version,
            event_type: event_type.into(),
            timestamp: 1486332418,
            data: Some(Payload::from_json(r#"{"foo": "bar"}"#).unwrap()),
            snapshot: None,
        }
    }

    async fn store() -> TableEventStore<MemoryBackend> {
        TableEventStore::open(MemoryBackend::from_lines(TEST_DATA).unwrap())
            .await
            .unwrap()
    }

    fn versions(events: &Events) -> Vec<i64> {
        events.iter().map(|event| event.version).collect()
    }

    #[tokio::test]
    async fn query_returns_the_stream_in_version_order() {
        let store = store().await;

        let events = store.query("id").await.unwrap();

        assert_eq!(versions(&events), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn query_of_an_unknown_id_is_empty() {
        let store = store().await;

        assert!(store.query("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chained_puts_are_queried_back_in_order() {
        let store = TableEventStore::open(MemoryBackend::new()).await.unwrap();

        for version in 1..=5 {
            store
                .put("p1", version - 1, event("p1", version, "NewItem"))
                .await
                .unwrap();
        }

        assert_eq!(versions(&store.query("p1").await.unwrap()), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn put_rejects_a_stale_prior_version() {
        let store = store().await;

        let result = store.put("id", 2, event("id", 3, "NewItem")).await;

        assert!(matches!(
            result,
            Err(Error::Conflict {
                expected: 2,
                stored: 3,
                ..
            })
        ));
        assert_eq!(versions(&store.query("id").await.unwrap()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn put_rejects_a_self_referential_version() {
        let store = store().await;

        let result = store.put("id", 3, event("id", 3, "NewItem")).await;

        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn put_rejects_a_regression_and_a_gap() {
        let store = store().await;

        let regression = store.put("id", 3, event("id", 2, "NewItem")).await;
        let gap = store.put("id", 3, event("id", 5, "NewItem")).await;

        assert!(matches!(regression, Err(Error::Conflict { .. })));
        assert!(matches!(gap, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn put_on_an_empty_stream_requires_version_zero() {
        let store = TableEventStore::open(MemoryBackend::new()).await.unwrap();

        let result = store.put("p1", 1, event("p1", 2, "NewItem")).await;

        assert!(matches!(result, Err(Error::Conflict { stored: 0, .. })));
    }

    #[tokio::test]
    async fn put_rejects_an_event_of_another_aggregate() {
        let store = store().await;

        let result = store.put("id", 3, event("other", 4, "NewItem")).await;

        assert!(matches!(result, Err(Error::AggregateMismatch { .. })));
    }

    #[tokio::test]
    async fn concurrent_writers_of_the_same_version_conflict() {
        let store = std::sync::Arc::new(store().await);

        let (first, second) = tokio::join!(
            store.put("id", 3, event("id", 4, "NewItem")),
            store.put("id", 3, event("id", 4, "NewItem")),
        );

        assert!(first.is_ok() != second.is_ok());
        assert_eq!(versions(&store.query("id").await.unwrap()), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn query_by_event_type_spans_aggregates() {
        let store = store().await;
        store
            .put("another", 0, event("another", 1, "NewItem"))
            .await
            .unwrap();

        let events = store.query_by_event_type("NewItem").await.unwrap();

        let keys: Vec<_> = events
            .iter()
            .map(|event| (event.id.as_str(), event.version))
            .collect();
        assert_eq!(keys, vec![("another", 1), ("id", 1), ("id", 2), ("id", 3)]);
    }

    #[tokio::test]
    async fn refresh_observes_writes_of_another_store() {
        let backend = MemoryBackend::new();
        let writer = TableEventStore::open(backend.clone()).await.unwrap();
        let reader = TableEventStore::open(backend).await.unwrap();

        writer.put("p1", 0, event("p1", 1, "NewItem")).await.unwrap();
        assert!(reader.query("p1").await.unwrap().is_empty());

        reader.refresh().await.unwrap();

        assert_eq!(versions(&reader.query("p1").await.unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn put_checks_against_writes_of_another_store() {
        let backend = MemoryBackend::new();
        let first = TableEventStore::open(backend.clone()).await.unwrap();
        let second = TableEventStore::open(backend).await.unwrap();
        first.put("p1", 0, event("p1", 1, "NewItem")).await.unwrap();

        let result = second.put("p1", 0, event("p1", 1, "NewItem")).await;

        assert!(matches!(result, Err(Error::Conflict { stored: 1, .. })));
        assert_eq!(versions(&second.query("p1").await.unwrap()), vec![1]);
    }

    #[tokio::test]
    async fn snapshot_is_attached_and_persisted() {
        let backend = MemoryBackend::from_lines(TEST_DATA).unwrap();
        let store = TableEventStore::open(backend.clone()).await.unwrap();
        let last = store.query("id").await.unwrap().last().cloned().unwrap();

        store
            .snapshot(&last, Payload::from_json(r#"{"count":3}"#).unwrap())
            .await
            .unwrap();

        let reopened = TableEventStore::open(backend).await.unwrap();
        let events = reopened.query("id").await.unwrap();
        assert_eq!(
            events[2].snapshot.as_ref().map(Payload::as_str),
            Some(r#"{"count":3}"#)
        );
        assert!(events[1].snapshot.is_none());
    }

    /// Holds every snapshot record until the gate is opened.
    struct GatedBackend {
        inner: MemoryBackend,
        gate: std::sync::Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Backend for GatedBackend {
        async fn scan(&self) -> Result<Vec<Event>, Error> {
            self.inner.scan().await
        }

        async fn append(&self, event: &Event) -> Result<(), Error> {
            if event.snapshot.is_some() {
                self.gate.notified().await;
            }
            self.inner.append(event).await
        }
    }

    #[tokio::test]
    async fn a_snapshot_keeps_events_appended_by_another_store() {
        let backend = MemoryBackend::new();
        backend.append(&event("p1", 1, "NewItem")).await.unwrap();
        let gate = std::sync::Arc::new(tokio::sync::Notify::new());
        let snapshotting = TableEventStore::open(GatedBackend {
            inner: backend.clone(),
            gate: gate.clone(),
        })
        .await
        .unwrap();
        let writer = TableEventStore::open(backend.clone()).await.unwrap();
        let first = snapshotting.query("p1").await.unwrap()[0].clone();

        let snapshot = snapshotting.snapshot(&first, Payload::encode(&1).unwrap());
        let put = async {
            writer.put("p2", 0, event("p2", 1, "NewItem")).await.unwrap();
            gate.notify_one();
        };
        let (snapshot, ()) = tokio::join!(snapshot, put);
        snapshot.unwrap();

        let reopened = TableEventStore::open(backend).await.unwrap();
        assert_eq!(versions(&reopened.query("p2").await.unwrap()), vec![1]);
        let events = reopened.query("p1").await.unwrap();
        assert_eq!(versions(&events), vec![1]);
        assert_eq!(events[0].snapshot.as_ref().map(Payload::as_str), Some("1"));
    }

    #[tokio::test]
    async fn the_latest_snapshot_record_wins() {
        let store = store().await;
        let last = store.query("id").await.unwrap().last().cloned().unwrap();

        store.snapshot(&last, Payload::encode(&1).unwrap()).await.unwrap();
        store.snapshot(&last, Payload::encode(&2).unwrap()).await.unwrap();

        let events = store.query("id").await.unwrap();
        assert_eq!(versions(&events), vec![1, 2, 3]);
        assert_eq!(events[2].snapshot.as_ref().map(Payload::as_str), Some("2"));
    }

    #[tokio::test]
    async fn snapshot_of_an_unknown_event_fails() {
        let store = store().await;

        let result = store
            .snapshot(&event("id", 9, "NewItem"), Payload::encode(&1).unwrap())
            .await;

        assert!(matches!(result, Err(Error::EventNotFound { version: 9, .. })));
    }
}
