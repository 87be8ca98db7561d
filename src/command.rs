use crate::{Aggregate, Error};

/// A request to modify one aggregate.
///
/// Commands are executed by the [CommandBus](crate::CommandBus): the aggregate is loaded from its
/// events, the command mutates it, then the emitted events are committed and published.
///
/// # Associated constant
///
/// * [NAME](Self::NAME) - the unique name of the command
///
/// # Example
///
/// ```
/// use ballotbox::{Command, Error, Poll};
///
/// pub struct ReopenPoll {
///     pub id: String,
/// }
///
/// impl Command for ReopenPoll {
///     type Aggregate = Poll;
///     const NAME: &'static str = "reopen-poll";
///
///     fn aggregate_id(&self) -> &str {
///         &self.id
///     }
///
///     fn execute(&self, poll: &mut Poll) -> Result<(), Error> {
///         poll.open_polls()
///     }
/// }
/// ```
pub trait Command: Send + Sync {
    /// The aggregate the command modifies.
    type Aggregate: Aggregate;

    /// The name of the command. Must be unique.
    const NAME: &'static str;

    /// The id of the modified aggregate.
    fn aggregate_id(&self) -> &str;

    /// Whether the aggregate must already exist.
    fn existence(&self) -> Existence {
        Existence::Existing
    }

    /// Whether a snapshot of the aggregate is attached to the last committed event.
    fn snapshot(&self) -> bool {
        false
    }

    /// Mutates the aggregate, which emits the resulting events.
    fn execute(&self, aggregate: &mut Self::Aggregate) -> Result<(), Error>;
}

/// The expectation of a command about the existence of its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// The aggregate must not have any event.
    New,
    /// The aggregate must have at least one event.
    Existing,
}
