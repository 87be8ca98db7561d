//! # Ballotbox
//!
//! Ballotbox is an event-sourced voting engine. Polls are aggregates whose state is derived from
//! their own event stream, and read models are rebuilt from the event store.
//!
//! ## Concepts
//!
//! Anything that happens to a poll is recorded as an [Event] in an [EventStore]. Writes are
//! checked with optimistic concurrency: an event is only accepted when it directly follows the
//! last stored version of its aggregate.
//!
//! [Aggregates](Aggregate) are loaded by replaying their events, starting from the latest
//! snapshot when there is one. Mutating an aggregate emits new events, which are committed to the
//! store, then published to an [EventManager].
//!
//! ## Command bus
//!
//! The [CommandBus] is the main entry point for writes. It takes a [command](Command), loads the
//! aggregate, lets the command mutate it, commits the resulting events and publishes them.
//!
//! ## Read side
//!
//! The [EventManager] routes published events to subscribed [handlers](EventHandler). The
//! [Dispatcher](dispatcher::Dispatcher) feeds it from an external
//! [message queue](bus::MessageQueue), through a chain of [filters](dispatcher::Filter). The
//! [OpenPolls](projection::OpenPolls) view lists the polls accepting ballots.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate self as ballotbox;

mod aggregate;
pub mod bus;
mod command;
mod command_bus;
mod configuration;
pub mod dispatcher;
mod error;
mod event;
mod manager;
pub mod poll;
pub mod projection;
pub mod store;
pub mod views;

pub use aggregate::{Aggregate, AggregateRoot};
pub use command::{Command, Existence};
pub use command_bus::CommandBus;
pub use configuration::Configuration;
pub use error::Error;
pub use event::{DomainEvent, Event, Events, Payload};
pub use manager::{
    handler_fn, EventHandler, EventManager, HandlerFn, Subscriber, Subscription, Subscriptions,
};
pub use poll::{Ballot, Issue, Poll, PollError, Selection};
pub use store::EventStore;

/// Derives [DomainEvent] for a struct or an enum.
///
/// The event name is the name of the type, unless it is set with `#[event(name = "...")]`.
pub use ballotbox_macros::DomainEvent;
