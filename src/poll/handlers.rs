use async_trait::async_trait;
use std::sync::Arc;

use crate::poll::{BallotCast, IssueAppended, PollClosed, PollCreated, PollEvent, PollOpened};
use crate::{Error, Event, EventHandler, EventManager, Subscription};

/// Reacts to typed poll events.
///
/// Every method does nothing by default: implementors only override the events they care about.
#[async_trait]
pub trait PollEventHandler: Send + Sync {
    /// Handles a [PollCreated] event.
    async fn on_poll_created(&self, _event: PollCreated) -> Result<(), Error> {
        Ok(())
    }

    /// Handles a [PollOpened] event.
    async fn on_poll_opened(&self, _event: PollOpened) -> Result<(), Error> {
        Ok(())
    }

    /// Handles a [PollClosed] event.
    async fn on_poll_closed(&self, _event: PollClosed) -> Result<(), Error> {
        Ok(())
    }

    /// Handles an [IssueAppended] event.
    async fn on_issue_appended(&self, _event: IssueAppended) -> Result<(), Error> {
        Ok(())
    }

    /// Handles a [BallotCast] event.
    async fn on_ballot_cast(&self, _event: BallotCast) -> Result<(), Error> {
        Ok(())
    }
}

/// Decodes records into [poll events](PollEvent) and dispatches them to a [PollEventHandler].
pub struct EventRouter<H: ?Sized> {
    handler: Arc<H>,
}

impl<H> EventRouter<H>
where
    H: PollEventHandler + ?Sized + 'static,
{
    /// Wraps a typed handler.
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Subscribes the router to each of `event_types` and returns the subscriptions.
    pub async fn subscribe(
        self,
        manager: &EventManager,
        event_types: &[&str],
    ) -> Result<Vec<Subscription>, Error> {
        let router: Arc<dyn EventHandler> = Arc::new(self);
        let mut subscriptions = Vec::with_capacity(event_types.len());
        for event_type in event_types {
            subscriptions.push(manager.subscribe(*event_type, router.clone()).await?);
        }
        Ok(subscriptions)
    }
}

#[async_trait]
impl<H> EventHandler for EventRouter<H>
where
    H: PollEventHandler + ?Sized + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), Error> {
        let decoded = PollEvent::decode(event)?;
        log::debug!("Routing {} of poll {}", decoded.name(), event.id);
        match decoded {
            PollEvent::PollCreated(event) => self.handler.on_poll_created(event).await,
            PollEvent::PollOpened(event) => self.handler.on_poll_opened(event).await,
            PollEvent::PollClosed(event) => self.handler.on_poll_closed(event).await,
            PollEvent::IssueAppended(event) => self.handler.on_issue_appended(event).await,
            PollEvent::BallotCast(event) => self.handler.on_ballot_cast(event).await,
        }
    }
}
