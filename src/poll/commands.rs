use crate::poll::{Ballot, Issue, Poll};
use crate::{Command, Error, Existence};

/// Creates a poll with its issues.
#[derive(Debug, Clone)]
pub struct CreatePoll {
    /// The id of the new poll.
    pub id: String,
    /// The issues of the poll. Duplicate topics are ignored.
    pub issues: Vec<Issue>,
}

impl Command for CreatePoll {
    type Aggregate = Poll;
    const NAME: &'static str = "create-poll";

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn existence(&self) -> Existence {
        Existence::New
    }

    fn execute(&self, poll: &mut Poll) -> Result<(), Error> {
        for issue in &self.issues {
            poll.append_issue(issue.clone())?;
        }
        Ok(())
    }
}

/// Opens a poll.
#[derive(Debug, Clone)]
pub struct OpenPoll {
    /// The poll id.
    pub id: String,
}

impl Command for OpenPoll {
    type Aggregate = Poll;
    const NAME: &'static str = "open-poll";

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn execute(&self, poll: &mut Poll) -> Result<(), Error> {
        poll.open_polls()
    }
}

/// Closes a poll and snapshots it.
#[derive(Debug, Clone)]
pub struct ClosePoll {
    /// The poll id.
    pub id: String,
}

impl Command for ClosePoll {
    type Aggregate = Poll;
    const NAME: &'static str = "close-poll";

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> bool {
        true
    }

    fn execute(&self, poll: &mut Poll) -> Result<(), Error> {
        poll.close_polls()
    }
}

/// Casts a ballot on a poll.
#[derive(Debug, Clone)]
pub struct CastBallot {
    /// The poll id.
    pub id: String,
    /// The selections of the voter.
    pub ballot: Ballot,
}

impl Command for CastBallot {
    type Aggregate = Poll;
    const NAME: &'static str = "cast-ballot";

    fn aggregate_id(&self) -> &str {
        &self.id
    }

    fn execute(&self, poll: &mut Poll) -> Result<(), Error> {
        poll.cast_ballot(self.ballot.clone())
    }
}
