//! The OpenPolls read model: the polls currently accepting ballots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::poll::{EventRouter, Issue, Poll, PollClosed, PollEventHandler, PollOpened};
use crate::views::{ViewRow, ViewStore};
use crate::{Aggregate, DomainEvent, Error, EventManager, EventStore, Subscriber, Subscriptions};

/// The id of the view row holding the open polls.
pub const OPEN_POLLS_ROW: &str = "OpenPolls";

/// An open poll, as listed by [OpenPolls].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStub {
    /// The poll id.
    pub id: String,
    /// The issues of the poll.
    pub issues: Vec<Issue>,
}

enum Request {
    Rebuild {
        permit: OwnedSemaphorePermit,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// The set of open polls, rebuilt from the event store.
///
/// The view is owned by a dedicated task. At most one rebuild runs at a time: a rebuild requested
/// while another one is in flight fails at once with [Error::Processing]. Readers never wait for a
/// rebuild; they see the result of the last complete one.
pub struct OpenPolls {
    requests: mpsc::UnboundedSender<Request>,
    in_flight: Arc<Semaphore>,
    polls: watch::Receiver<Arc<Vec<PollStub>>>,
}

impl OpenPolls {
    /// Starts the view and performs an initial rebuild.
    pub async fn open(store: Arc<dyn EventStore>) -> Result<Self, Error> {
        let (requests, receiver) = mpsc::unbounded_channel();
        let (publisher, polls) = watch::channel(Arc::new(Vec::new()));
        tokio::spawn(run(store, receiver, publisher));
        let view = Self {
            requests,
            in_flight: Arc::new(Semaphore::new(1)),
            polls,
        };
        view.rebuild().await?;
        Ok(view)
    }

    /// Rebuilds the view from the event store.
    ///
    /// Fails with [Error::Processing] when a rebuild is already running, and with
    /// [Error::ViewClosed] once the view is closed. A failed rebuild leaves the view unchanged.
    pub async fn rebuild(&self) -> Result<(), Error> {
        let permit = match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(Error::Processing),
            Err(TryAcquireError::Closed) => return Err(Error::ViewClosed),
        };
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Rebuild { permit, reply })
            .map_err(|_| Error::ViewClosed)?;
        response.await.map_err(|_| Error::ViewClosed)?
    }

    /// The open polls, sorted by id.
    pub fn list(&self) -> Vec<PollStub> {
        self.polls.borrow().to_vec()
    }

    /// Whether a poll is open.
    pub fn contains(&self, id: &str) -> bool {
        self.polls.borrow().iter().any(|stub| stub.id == id)
    }

    /// Stops the view once the running rebuild, if any, has finished.
    pub async fn close(&self) {
        self.in_flight.close();
        let (reply, response) = oneshot::channel();
        if self.requests.send(Request::Close { reply }).is_ok() {
            let _ = response.await;
        }
    }
}

async fn run(
    store: Arc<dyn EventStore>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    publisher: watch::Sender<Arc<Vec<PollStub>>>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Rebuild { permit, reply } => {
                let result = rebuild(store.as_ref()).await.map(|polls| {
                    log::debug!("OpenPolls rebuilt with {} polls", polls.len());
                    publisher.send_replace(Arc::new(polls));
                });
                if let Err(error) = &result {
                    log::warn!("OpenPolls rebuild failed: {error}");
                }
                drop(permit);
                let _ = reply.send(result);
            }
            Request::Close { reply } => {
                log::info!("OpenPolls closed");
                let _ = reply.send(());
                return;
            }
        }
    }
}

async fn rebuild(store: &dyn EventStore) -> Result<Vec<PollStub>, Error> {
    let mut events = store.query_by_event_type(PollOpened::NAME).await?;
    events.extend(store.query_by_event_type(PollClosed::NAME).await?);

    let mut open = BTreeSet::new();
    for event in events.sorted() {
        if event.event_type == PollOpened::NAME {
            open.insert(event.id);
        } else {
            open.remove(&event.id);
        }
    }

    let mut polls = Vec::with_capacity(open.len());
    for id in open {
        let poll = Poll::load(&id, store.query(&id).await?)?;
        polls.push(PollStub {
            id,
            issues: poll.issues,
        });
    }
    Ok(polls)
}

struct OpenPollsWriter {
    view: Arc<OpenPolls>,
    views: Arc<dyn ViewStore>,
}

impl OpenPollsWriter {
    async fn process(&self) -> Result<(), Error> {
        match self.view.rebuild().await {
            Ok(()) => {}
            Err(Error::Processing) => {
                log::debug!("OpenPolls rebuild already in flight");
                return Ok(());
            }
            Err(Error::ViewClosed) => return Ok(()),
            Err(error) => return Err(error),
        }
        let row = ViewRow::encode(OPEN_POLLS_ROW, &self.view.list())?;
        self.views.put(row).await
    }
}

#[async_trait]
impl PollEventHandler for OpenPollsWriter {
    async fn on_poll_opened(&self, _event: PollOpened) -> Result<(), Error> {
        self.process().await
    }

    async fn on_poll_closed(&self, _event: PollClosed) -> Result<(), Error> {
        self.process().await
    }
}

/// Keeps the [OpenPolls] view row up to date: every time a poll is opened or closed, the view is
/// rebuilt and written to a [ViewStore].
pub struct OpenPollsHandler {
    writer: Arc<OpenPollsWriter>,
    subscriptions: Subscriptions,
}

impl OpenPollsHandler {
    /// Creates a handler writing `view` to `views`.
    pub fn new(view: Arc<OpenPolls>, views: Arc<dyn ViewStore>) -> Self {
        Self {
            writer: Arc::new(OpenPollsWriter { view, views }),
            subscriptions: Subscriptions::new(),
        }
    }

    /// Rebuilds the view and writes it. A rebuild already in flight or a closed view is not an
    /// error.
    pub async fn process(&self) -> Result<(), Error> {
        self.writer.process().await
    }
}

#[async_trait]
impl Subscriber for OpenPollsHandler {
    async fn subscribe(&self, manager: &EventManager) -> Result<(), Error> {
        let subscriptions = EventRouter::new(self.writer.clone())
            .subscribe(manager, &[PollOpened::NAME, PollClosed::NAME])
            .await?;
        self.subscriptions.bind(manager, subscriptions).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.subscriptions.release().await
    }
}
