use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use ballotbox::bus::{Forwarder, MemoryQueue, QueueSettings};
use ballotbox::dispatcher::{Dispatcher, DispatcherState};
use ballotbox::projection::{OpenPolls, PollStub, OPEN_POLLS_ROW};
use ballotbox::store::{FileBackend, TableEventStore};
use ballotbox::views::{FileViewStore, ViewStore};
use ballotbox::{Command, CommandBus, EventManager, EventStore, Subscriber};

use crate::configuration::{configuration, FORWARDED};
use crate::Error;

const EVENTS_TABLE: &str = "events";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The write side and the worker side of the voting system, wired in one process. They only share
/// the data directory and the message queue.
pub struct VotingApp {
    command_bus: CommandBus,
    local: EventManager,
    forwarder: Forwarder,
    queue: Arc<MemoryQueue>,
    worker: EventManager,
    dispatcher: Arc<Dispatcher>,
    dispatching: JoinHandle<Result<(), ballotbox::Error>>,
    view: Arc<OpenPolls>,
}

impl VotingApp {
    pub async fn start(data_dir: &Path) -> Result<Self, Error> {
        let store: Arc<dyn EventStore> = Arc::new(
            TableEventStore::open(FileBackend::open(data_dir, EVENTS_TABLE).await?).await?,
        );
        let worker_store: Arc<dyn EventStore> = Arc::new(
            TableEventStore::open(FileBackend::open(data_dir, EVENTS_TABLE).await?).await?,
        );
        let views: Arc<dyn ViewStore> = Arc::new(FileViewStore::open(data_dir).await?);

        let local = EventManager::new();
        let queue = Arc::new(MemoryQueue::new(QueueSettings::default()));
        let forwarder = Forwarder::new(queue.clone(), FORWARDED);
        forwarder.subscribe(&local).await?;

        let worker = EventManager::new();
        let view = Arc::new(OpenPolls::open(worker_store.clone()).await?);
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            worker.clone(),
            configuration(worker_store, view.clone(), views),
        ));
        let dispatching = dispatcher.clone().spawn();

        Ok(Self {
            command_bus: CommandBus::new(store, local.clone()),
            local,
            forwarder,
            queue,
            worker,
            dispatcher,
            dispatching,
            view,
        })
    }

    pub async fn execute<C: Command>(&self, command: C) -> Result<(), Error> {
        let events = self.command_bus.execute(command).await?;
        log::info!("Committed {} event(s)", events.len());
        Ok(())
    }

    /// Stops the write side, lets the worker process every forwarded message, then stops it.
    /// Fails when the dispatcher loop ended on an error.
    pub async fn shutdown(self) -> Result<(), Error> {
        self.forwarder.close().await?;
        self.local.close().await?;
        self.drain().await;
        self.dispatcher.close().await;
        let dispatched = match self.dispatching.await {
            Ok(result) => result.map_err(Error::from),
            Err(error) => Err(Error(format!("Dispatcher task failed: {error}"))),
        };
        self.worker.close().await?;
        self.view.close().await;
        dispatched
    }

    async fn drain(&self) {
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            loop {
                if self.dispatcher.state() == DispatcherState::Stopped {
                    return;
                }
                let stats = self.queue.stats().await;
                if stats.ready + stats.reserved + stats.delayed == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            log::warn!("Stopping with undelivered messages");
        }
    }
}

/// Reads the materialized list of open polls. A missing row is an empty list.
pub async fn open_polls(data_dir: &Path) -> Result<Vec<PollStub>, Error> {
    let views = FileViewStore::open(data_dir).await?;
    match views.get(OPEN_POLLS_ROW).await {
        Ok(row) => Ok(row.data.decode()?),
        Err(ballotbox::Error::RowNotFound(_)) => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}
