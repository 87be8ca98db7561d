//! An in-process publish/subscribe router.
//!
//! The subscription table is owned by a single routing task. Every operation is a request sent to
//! that task, so subscribing, unsubscribing and publishing never contend on a lock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinSet};

use crate::{Error, Event};

/// Handles events published to an [EventManager].
///
/// A handler that returns an error is unsubscribed.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &Event) -> Result<(), Error>;
}

/// An [EventHandler] backed by an async closure. Created with [handler_fn].
pub struct HandlerFn<F> {
    function: F,
}

/// Creates an [EventHandler] from an async closure.
pub fn handler_fn<F, Fut>(function: F) -> HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    HandlerFn { function }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), Error> {
        (self.function)(event.clone()).await
    }
}

/// A component bound to an [EventManager] for the lifetime of a process.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribes the handlers of the component.
    async fn subscribe(&self, manager: &EventManager) -> Result<(), Error>;

    /// Unsubscribes every handler registered by [subscribe](Self::subscribe).
    async fn close(&self) -> Result<(), Error>;
}

/// A handle on a subscription, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    event_type: String,
}

impl Subscription {
    /// The event type the subscription listens to.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// The subscriptions registered by a [Subscriber], released together.
#[derive(Default)]
pub struct Subscriptions {
    bound: Mutex<Option<(EventManager, Vec<Subscription>)>>,
}

impl Subscriptions {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records subscriptions made on `manager`, releasing any previously recorded ones.
    pub async fn bind(
        &self,
        manager: &EventManager,
        subscriptions: Vec<Subscription>,
    ) -> Result<(), Error> {
        let previous = self
            .bound
            .lock()
            .await
            .replace((manager.clone(), subscriptions));
        match previous {
            Some((manager, subscriptions)) => release(&manager, subscriptions).await,
            None => Ok(()),
        }
    }

    /// Unsubscribes every recorded subscription. Does nothing when nothing is recorded.
    pub async fn release(&self) -> Result<(), Error> {
        match self.bound.lock().await.take() {
            Some((manager, subscriptions)) => release(&manager, subscriptions).await,
            None => Ok(()),
        }
    }
}

async fn release(manager: &EventManager, subscriptions: Vec<Subscription>) -> Result<(), Error> {
    for subscription in &subscriptions {
        match manager.unsubscribe(subscription).await {
            Ok(()) | Err(Error::ManagerClosed) => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

enum Request {
    Subscribe {
        event_type: String,
        handler: Arc<dyn EventHandler>,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe {
        subscription: Subscription,
        reply: oneshot::Sender<()>,
    },
    Publish(Event),
    Count {
        event_type: String,
        reply: oneshot::Sender<usize>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Routes published events to the handlers subscribed to their type.
///
/// Cloning the manager yields another handle on the same router. Publishing only enqueues the
/// event: every handler invocation runs on its own task, and a handler that fails is unsubscribed.
/// After [close](Self::close), every other operation fails with [Error::ManagerClosed].
#[derive(Clone)]
pub struct EventManager {
    requests: mpsc::UnboundedSender<Request>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    /// Starts a router on the current tokio runtime.
    pub fn new() -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Router::default().run(receiver));
        Self { requests }
    }

    /// Subscribes a handler to an event type.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, Error> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Subscribe {
            event_type: event_type.into(),
            handler,
            reply,
        })?;
        response.await.map_err(|_| Error::ManagerClosed)
    }

    /// Removes a subscription. Removing an unknown subscription does nothing.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Unsubscribe {
            subscription: subscription.clone(),
            reply,
        })?;
        response.await.map_err(|_| Error::ManagerClosed)
    }

    /// Enqueues an event for delivery to the handlers subscribed to its type. Never waits for the
    /// handlers.
    pub fn publish(&self, event: Event) -> Result<(), Error> {
        self.send(Request::Publish(event))
    }

    /// The number of handlers subscribed to an event type.
    pub async fn subscriber_count(&self, event_type: &str) -> Result<usize, Error> {
        let (reply, response) = oneshot::channel();
        self.send(Request::Count {
            event_type: event_type.to_string(),
            reply,
        })?;
        response.await.map_err(|_| Error::ManagerClosed)
    }

    /// Stops the router once every running handler has returned. Closing a closed manager does
    /// nothing.
    pub async fn close(&self) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        if self.send(Request::Close { reply }).is_err() {
            return Ok(());
        }
        let _ = response.await;
        Ok(())
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        self.requests
            .send(request)
            .map_err(|_| Error::ManagerClosed)
    }
}

type Handlers = Vec<(Subscription, Arc<dyn EventHandler>)>;

#[derive(Default)]
struct Router {
    next_id: u64,
    handlers: HashMap<String, Handlers>,
    running: JoinSet<Result<(), (Subscription, Error)>>,
}

impl Router {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let closed = loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Close { reply }) => break Some(reply),
                    Some(request) => self.serve(request),
                    None => break None,
                },
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    self.reap(joined)
                }
            }
        };

        // Later sends fail with ManagerClosed; requests already queued are drained.
        requests.close();
        let mut waiting: Vec<_> = closed.into_iter().collect();
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Close { reply } => waiting.push(reply),
                Request::Publish(event) => log::warn!(
                    "Event manager closed, dropping {} version {} of {}",
                    event.event_type,
                    event.version,
                    event.id
                ),
                _ => {}
            }
        }

        while let Some(joined) = self.running.join_next().await {
            self.reap(joined);
        }
        log::info!("Event manager closed");
        for reply in waiting {
            let _ = reply.send(());
        }
    }

    fn serve(&mut self, request: Request) {
        match request {
            Request::Subscribe {
                event_type,
                handler,
                reply,
            } => {
                self.next_id += 1;
                let subscription = Subscription {
                    id: self.next_id,
                    event_type: event_type.clone(),
                };
                self.handlers
                    .entry(event_type)
                    .or_default()
                    .push((subscription.clone(), handler));
                let _ = reply.send(subscription);
            }
            Request::Unsubscribe {
                subscription,
                reply,
            } => {
                self.unsubscribe(&subscription);
                let _ = reply.send(());
            }
            Request::Publish(event) => self.dispatch(event),
            Request::Count { event_type, reply } => {
                let count = self.handlers.get(&event_type).map_or(0, Vec::len);
                let _ = reply.send(count);
            }
            Request::Close { .. } => {}
        }
    }

    fn dispatch(&mut self, event: Event) {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            return;
        };
        for (subscription, handler) in handlers {
            let subscription = subscription.clone();
            let handler = handler.clone();
            let event = event.clone();
            self.running.spawn(async move {
                handler
                    .handle(&event)
                    .await
                    .map_err(|error| (subscription, error))
            });
        }
    }

    fn reap(&mut self, joined: Result<Result<(), (Subscription, Error)>, JoinError>) {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err((subscription, error))) => {
                log::error!(
                    "Handler of {} failed, unsubscribing it: {error}",
                    subscription.event_type
                );
                self.unsubscribe(&subscription);
            }
            Err(error) => log::error!("Handler task failed: {error}"),
        }
    }

    fn unsubscribe(&mut self, subscription: &Subscription) {
        let Some(handlers) = self.handlers.get_mut(&subscription.event_type) else {
            log::debug!("No subscription to {} found", subscription.event_type);
            return;
        };
        let before = handlers.len();
        handlers.retain(|(candidate, _)| candidate != subscription);
        if handlers.len() == before {
            log::debug!(
                "Subscription {} to {} not found",
                subscription.id,
                subscription.event_type
            );
        }
        if handlers.is_empty() {
            self.handlers.remove(&subscription.event_type);
        }
    }
}
