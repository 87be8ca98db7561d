use crate::poll::PollError;

/// Errors that can occur in the event store, the event manager, the bus or the views.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An optimistic concurrency check failed: the version claimed by the writer does not match the
    /// last version stored for the aggregate. The caller must query and recompute.
    #[error(
        "Conflict on aggregate {id}: expected prior version {expected}, stored version is {stored}, event version is {version}"
    )]
    Conflict {
        /// The aggregate id.
        id: String,
        /// The prior version claimed by the writer.
        expected: i64,
        /// The last version actually stored (0 when the aggregate has no events).
        stored: i64,
        /// The version of the rejected event.
        version: i64,
    },
    /// An event was put under an aggregate id that is not its own.
    #[error("Event of aggregate {event_id} cannot be appended to aggregate {id}")]
    AggregateMismatch {
        /// The id the event was put under.
        id: String,
        /// The id carried by the event.
        event_id: String,
    },
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Poll(#[from] PollError),
    /// An aggregate was created with an id that already has events.
    #[error("Error creating aggregate, id {0} already exists")]
    AlreadyExists(String),
    /// An aggregate was expected to exist but has no events.
    #[error("Aggregate {0} not found")]
    NotFound(String),
    /// An error occurred when serializing or deserializing an event, an envelope or a view.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// An error occurred when reading or writing a file backed table.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// An event type outside of the known set was routed to a typed handler.
    #[error("Unhandled event type {0}")]
    UnhandledEventType(String),
    /// An event that requires a payload was stored without one.
    #[error("Event {0} has no payload")]
    MissingPayload(&'static str),
    /// The event manager has been closed and no longer serves requests.
    #[error("Event manager is closed")]
    ManagerClosed,
    /// A view rebuild was requested while another one is in flight.
    #[error("View is already processing")]
    Processing,
    /// The view has been shut down and no longer serves requests.
    #[error("View is not currently running")]
    ViewClosed,
    /// The message queue has been closed.
    #[error("Message queue is closed")]
    QueueClosed,
    /// A message was acknowledged or released with a receipt the queue does not know.
    #[error("Unknown message receipt {0}")]
    UnknownReceipt(u64),
    /// A view row was not found in the view store.
    #[error("View row {0} not found")]
    RowNotFound(String),
    /// The event store backend cannot attach snapshots.
    #[error("Snapshots are not supported by this event store")]
    SnapshotUnsupported,
    /// A snapshot was attached to an event that is not stored.
    #[error("Event {id} version {version} not found")]
    EventNotFound {
        /// The aggregate id.
        id: String,
        /// The version of the missing event.
        version: i64,
    },
    /// An event handler failed.
    #[error("Event handler failed: {0}")]
    Handler(String),
}
