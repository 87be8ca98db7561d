use std::ops::{Add, AddAssign};
use std::sync::Arc;

use crate::dispatcher::Filter;
use crate::Subscriber;

/// A configuration for a [Dispatcher](crate::dispatcher::Dispatcher).
///
/// Filters run in the order they were added. Subscribers are bound to the event manager when the
/// dispatcher starts and closed when it stops.
///
/// Implements [Add] and [AddAssign] for composition of multiple configurations.
#[derive(Clone, Default)]
pub struct Configuration {
    pub(crate) filters: Vec<Arc<dyn Filter>>,
    pub(crate) subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Configuration {
    /// Creates a new empty [Configuration].
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter to the chain. Takes ownership and returns the configuration to allow
    /// chaining.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Adds a subscriber. Takes ownership and returns the configuration to allow chaining.
    pub fn subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

impl Add for Configuration {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for Configuration {
    fn add_assign(&mut self, rhs: Self) {
        self.filters.extend(rhs.filters);
        self.subscribers.extend(rhs.subscribers);
    }
}
