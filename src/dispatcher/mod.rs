//! The bridge from an external message queue to a local [EventManager].

mod filters;

pub use filters::{EventTypeFilter, Filter, RefreshFilter, Rejection};

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{Message, MessageQueue};
use crate::{Configuration, Error, EventManager, Subscriber};

/// The lifecycle of a [Dispatcher] loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// The loop has not been started.
    Idle,
    /// The loop is receiving messages.
    Running,
    /// The loop has exited.
    Stopped,
}

/// Receives messages from a [MessageQueue], runs them through a filter chain and publishes the
/// events that pass to an [EventManager].
///
/// A published message is acknowledged. A rejected message is acknowledged or released according
/// to the [Rejection]. A message whose filter failed is left reserved, so the queue delivers it
/// again once the reservation expires.
pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    manager: EventManager,
    configuration: Configuration,
    closing: watch::Sender<bool>,
    state: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    /// Creates a dispatcher. Nothing is received until [run](Self::run) is called.
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        manager: EventManager,
        configuration: Configuration,
    ) -> Self {
        Self {
            queue,
            manager,
            configuration,
            closing: watch::channel(false).0,
            state: watch::channel(DispatcherState::Idle).0,
        }
    }

    /// The current state of the loop.
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Binds the configured subscribers, then dispatches messages until [close](Self::close) is
    /// called or receiving fails. The subscribers are closed when the loop exits.
    ///
    /// A dispatcher runs once: calling `run` on a running or stopped dispatcher returns at once.
    pub async fn run(&self) -> Result<(), Error> {
        let started = self.state.send_if_modified(|state| {
            if *state == DispatcherState::Idle {
                *state = DispatcherState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            log::warn!("Dispatcher already started");
            return Ok(());
        }

        log::info!("Dispatcher started");
        let result = match self.bind().await {
            Ok(()) => self.dispatch().await,
            Err(error) => Err(error),
        };
        self.release().await;
        self.state.send_replace(DispatcherState::Stopped);
        log::info!("Dispatcher stopped");
        result
    }

    /// Runs the dispatcher on a new task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<(), Error>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Requests the loop to stop and waits until it has exited. Returns at once when the loop is
    /// not running.
    pub async fn close(&self) {
        self.closing.send_replace(true);
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state != DispatcherState::Running)
            .await;
    }

    async fn bind(&self) -> Result<(), Error> {
        for subscriber in &self.configuration.subscribers {
            subscriber.subscribe(&self.manager).await?;
        }
        Ok(())
    }

    async fn release(&self) {
        for subscriber in &self.configuration.subscribers {
            if let Err(error) = subscriber.close().await {
                log::warn!("Failed to close subscriber: {error}");
            }
        }
    }

    async fn dispatch(&self) -> Result<(), Error> {
        let mut closing = self.closing.subscribe();
        loop {
            if *closing.borrow() {
                return Ok(());
            }

            let received = tokio::select! {
                _ = closing.wait_for(|closing| *closing) => return Ok(()),
                received = self.queue.receive() => received,
            };
            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(error) => {
                    log::error!("Failed to receive messages, stopping dispatcher: {error}");
                    return Err(error);
                }
            };

            if *closing.borrow() {
                if let Err(error) = self.queue.nack(&message).await {
                    log::warn!("Failed to release message {}: {error}", message.receipt());
                }
                return Ok(());
            }

            if let Err(error) = self.handle(&message).await {
                log::error!(
                    "Failed to dispatch {} of {}: {error}",
                    message.event().event_type,
                    message.event().id
                );
            }
        }
    }

    async fn handle(&self, message: &Message) -> Result<(), Error> {
        match self.filter(message).await {
            Ok(()) => {
                self.manager.publish(message.event().clone())?;
                self.queue.ack(message).await
            }
            Err(Rejection::Nack) => self.queue.nack(message).await,
            Err(Rejection::Ack) => self.queue.ack(message).await,
            Err(Rejection::Failed(error)) => Err(error),
        }
    }

    async fn filter(&self, message: &Message) -> Result<(), Rejection> {
        for filter in &self.configuration.filters {
            filter.filter(message).await?;
        }
        Ok(())
    }
}
