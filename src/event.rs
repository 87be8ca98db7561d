use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Error;

/// A typed domain event: something that happened to an aggregate.
///
/// Typed events are carried inside an [Event] record, whose `type` is the [NAME](Self::NAME) of
/// the domain event and whose `data` is the serialized domain event.
///
/// # Associated constant
///
/// * [NAME](Self::NAME) - the unique name of the event, used as the record type on the wire
///
/// # Example
///
/// ```
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct PollArchived {
///     id: String,
/// }
///
/// impl ballotbox::DomainEvent for PollArchived {
///     const NAME: &'static str = "PollArchived";
/// }
/// ```
pub trait DomainEvent: Serialize + DeserializeOwned {
    /// The name of the event. Must be unique.
    const NAME: &'static str;

    /// Serializes the event into a [Payload].
    fn to_payload(&self) -> Result<Payload, Error> {
        Payload::encode(self)
    }
}

/// An opaque JSON fragment.
///
/// The payload keeps the exact bytes it was created or deserialized from, so an event forwarded
/// across process boundaries carries byte-identical data.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Serializes a value into a payload.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self(serde_json::value::to_raw_value(value)?))
    }

    /// Wraps an already serialized JSON document. Fails if `json` is not valid JSON.
    pub fn from_json(json: impl Into<String>) -> Result<Self, Error> {
        Ok(Self(RawValue::from_string(json.into())?))
    }

    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(self.0.get())?)
    }

    /// The payload as JSON text.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// The payload as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.get().as_bytes()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Payload {}

impl Debug for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({})", self.as_str())
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event store record.
///
/// Within one aggregate id, events are totally ordered by `version`, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The id of the aggregate the event belongs to.
    pub id: String,
    /// The position of the event in the aggregate stream.
    pub version: i64,
    /// The name of the [DomainEvent] carried by the record.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event was emitted, in seconds since the unix epoch.
    pub timestamp: i64,
    /// The serialized domain event.
    #[serde(default)]
    pub data: Option<Payload>,
    /// A materialized state of the aggregate as of this event, used to shortcut replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Payload>,
}

impl Event {
    /// Creates an unversioned record for the given type and data. The aggregate root assigns the
    /// id, version and timestamp when the event is emitted.
    pub fn new(event_type: impl Into<String>, data: Option<Payload>) -> Self {
        Self {
            id: String::new(),
            version: 0,
            event_type: event_type.into(),
            timestamp: 0,
            data,
            snapshot: None,
        }
    }

    /// Creates an unversioned record from a domain event.
    pub fn from_domain<E: DomainEvent>(event: &E) -> Result<Self, Error> {
        Ok(Self::new(E::NAME, Some(event.to_payload()?)))
    }

    /// Deserializes the data of the record into a domain event.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, Error> {
        self.data
            .as_ref()
            .ok_or(Error::MissingPayload(E::NAME))?
            .decode()
    }

    /// Serializes the record as a single line of JSON.
    pub fn to_line(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes a record from a single line of JSON.
    pub fn from_line(line: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(line)?)
    }
}

/// The current time in seconds since the unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Wrapper for a [Vec] of [events](Event).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Events(pub Vec<Event>);

impl Events {
    /// Creates a new empty [Events].
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds an event to the wrapped [Vec].
    pub fn push(&mut self, event: Event) {
        self.0.push(event)
    }

    /// Sorts the events by aggregate id, then by version.
    pub fn sort(&mut self) {
        self.0.sort_by(|left, right| {
            left.id
                .cmp(&right.id)
                .then_with(|| left.version.cmp(&right.version))
        })
    }

    /// Sorts the events by aggregate id, then by version, and returns them.
    pub fn sorted(mut self) -> Self {
        self.sort();
        self
    }

    /// The version of the last event, or 0 when there are no events.
    pub fn last_version(&self) -> i64 {
        self.0.last().map(|event| event.version).unwrap_or(0)
    }
}

impl Deref for Events {
    type Target = [Event];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Event> for Events {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Events(iter.into_iter().collect())
    }
}

impl Extend<Event> for Events {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

impl IntoIterator for Events {
    type Item = Event;
    type IntoIter = <Vec<Event> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
