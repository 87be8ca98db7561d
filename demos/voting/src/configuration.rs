use std::sync::Arc;

use ballotbox::dispatcher::{EventTypeFilter, RefreshFilter};
use ballotbox::poll::{PollClosed, PollOpened};
use ballotbox::projection::{OpenPolls, OpenPollsHandler};
use ballotbox::views::ViewStore;
use ballotbox::{Configuration, DomainEvent, EventStore};

/// The event types the worker side consumes.
pub const FORWARDED: [&str; 2] = [PollOpened::NAME, PollClosed::NAME];

pub fn configuration(
    store: Arc<dyn EventStore>,
    view: Arc<OpenPolls>,
    views: Arc<dyn ViewStore>,
) -> Configuration {
    Configuration::new()
        .filter(EventTypeFilter::new(FORWARDED))
        .filter(RefreshFilter::new(store))
        .subscriber(Arc::new(OpenPollsHandler::new(view, views)))
}
