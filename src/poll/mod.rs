//! The voting domain: polls, their events, handlers and commands.

mod commands;
mod events;
mod handlers;

pub use commands::{CastBallot, ClosePoll, CreatePoll, OpenPoll};
pub use events::{
    BallotCast, BallotSelection, IssueAppended, PollClosed, PollCreated, PollEvent, PollOpened,
};
pub use handlers::{EventRouter, PollEventHandler};

use serde::{Deserialize, Serialize};

use crate::{Aggregate, AggregateRoot, Error, Event};

/// Violations of the poll rules. A rejected operation emits nothing and leaves the poll untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// A ballot was cast on a poll that is not open.
    #[error("Must wait for polls to be open")]
    PollClosed,
    /// A ballot refers to an issue that is not on the poll.
    #[error("Issue on submitted ballot not on poll")]
    IssueNotOnPoll,
    /// The poll is already open.
    #[error("Poll already open")]
    AlreadyOpen,
    /// The poll is already closed.
    #[error("Poll already closed")]
    AlreadyClosed,
}

/// A question put to voters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// The topic of the issue, unique within a poll.
    pub topic: String,
    /// The choices offered to voters.
    pub choices: Vec<String>,
    /// Whether voters may write in their own answer.
    pub can_write_in: bool,
}

/// The answer of a voter to one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// The issue answered.
    pub issue: Issue,
    /// Whether the voter wrote in an answer. Derived from [write_in](Self::write_in) when the
    /// ballot is cast.
    pub wrote_in: bool,
    /// The index of the selected choice.
    pub choice: usize,
    /// The written in answer, empty when the voter picked a choice.
    pub write_in: String,
    /// A free-form comment.
    pub comment: String,
}

impl Selection {
    /// Selects a choice of the issue with the given topic.
    pub fn choice(topic: impl Into<String>, choice: usize) -> Self {
        Self {
            issue: Issue {
                topic: topic.into(),
                ..Issue::default()
            },
            choice,
            ..Self::default()
        }
    }

    /// Writes in an answer to the issue with the given topic.
    pub fn write_in(topic: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            issue: Issue {
                topic: topic.into(),
                ..Issue::default()
            },
            wrote_in: true,
            write_in: answer.into(),
            ..Self::default()
        }
    }
}

/// The selections of one voter, in order.
pub type Ballot = Vec<Selection>;

/// A poll: a set of issues that voters answer with ballots while the poll is open.
///
/// A poll is created closed, accepts issues until it is opened, then accepts ballots until it is
/// closed. It can be reopened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    /// Whether ballots are accepted.
    pub is_open: bool,
    /// The issues, unique by topic.
    pub issues: Vec<Issue>,
    /// The cast ballots.
    pub ballots: Vec<Ballot>,
    #[serde(flatten)]
    root: AggregateRoot,
}

impl Poll {
    /// The poll id.
    pub fn id(&self) -> &str {
        &self.root.id
    }

    /// Finds an issue by topic.
    pub fn issue(&self, topic: &str) -> Option<&Issue> {
        self.issues.iter().find(|issue| issue.topic == topic)
    }

    /// Adds an issue. Does nothing when the poll is open or when an issue with the same topic
    /// already exists.
    pub fn append_issue(&mut self, issue: Issue) -> Result<(), Error> {
        if self.is_open || self.issue(&issue.topic).is_some() {
            return Ok(());
        }
        self.root.emit(&IssueAppended::from(&issue))?;
        self.issues.push(issue);
        Ok(())
    }

    /// Opens the poll.
    pub fn open_polls(&mut self) -> Result<(), Error> {
        if self.is_open {
            return Err(PollError::AlreadyOpen.into());
        }
        let event = PollOpened {
            id: self.root.id.clone(),
        };
        self.root.emit(&event)?;
        self.is_open = true;
        Ok(())
    }

    /// Closes the poll.
    pub fn close_polls(&mut self) -> Result<(), Error> {
        if !self.is_open {
            return Err(PollError::AlreadyClosed.into());
        }
        let event = PollClosed {
            id: self.root.id.clone(),
        };
        self.root.emit(&event)?;
        self.is_open = false;
        Ok(())
    }

    /// Casts a ballot. Every selection must refer to an issue of the poll, otherwise the whole
    /// ballot is rejected.
    pub fn cast_ballot(&mut self, ballot: Ballot) -> Result<(), Error> {
        if !self.is_open {
            return Err(PollError::PollClosed.into());
        }
        let ballot = self.bind(ballot).ok_or(PollError::IssueNotOnPoll)?;
        let event = BallotCast(ballot.iter().map(BallotSelection::from).collect());
        self.root.emit(&event)?;
        self.ballots.push(ballot);
        Ok(())
    }

    /// Replaces the issue of each selection with the issue of the poll that has the same topic.
    fn bind(&self, ballot: Ballot) -> Option<Ballot> {
        ballot
            .into_iter()
            .map(|selection| {
                let issue = self.issue(&selection.issue.topic)?.clone();
                Some(Selection {
                    issue,
                    wrote_in: !selection.write_in.is_empty(),
                    ..selection
                })
            })
            .collect()
    }

    fn replay_ballot(&mut self, event: BallotCast) {
        let ballot = event
            .0
            .into_iter()
            .filter_map(|selection| {
                let issue = self.issue(&selection.issue_topic)?.clone();
                Some(Selection {
                    issue,
                    wrote_in: selection.wrote_in,
                    choice: selection.choice,
                    write_in: selection.write_in,
                    comment: selection.comment,
                })
            })
            .collect();
        self.ballots.push(ballot);
    }
}

impl Aggregate for Poll {
    type CreationEvent = PollCreated;

    fn root(&self) -> &AggregateRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot {
        &mut self.root
    }

    fn creation_event(id: &str) -> PollCreated {
        PollCreated { id: id.to_string() }
    }

    fn apply(&mut self, event: &Event) {
        match PollEvent::decode(event) {
            Ok(PollEvent::PollCreated(created)) => self.root.id = created.id,
            Ok(PollEvent::PollOpened(_)) => self.is_open = true,
            Ok(PollEvent::PollClosed(_)) => self.is_open = false,
            Ok(PollEvent::IssueAppended(appended)) => self.issues.push(appended.into()),
            Ok(PollEvent::BallotCast(cast)) => self.replay_ballot(cast),
            Err(error) => log::warn!(
                "Skipping event {} version {} of poll {}: {error}",
                event.event_type,
                event.version,
                event.id,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainEvent, Events, Payload};

    fn lunch() -> Issue {
        Issue {
            topic: "Lunch".into(),
            choices: vec!["Soup".into(), "Salad".into()],
            can_write_in: true,
        }
    }

    fn dessert() -> Issue {
        Issue {
            topic: "Dessert".into(),
            choices: vec!["Pie".into(), "Cake".into()],
            can_write_in: false,
        }
    }

    fn pending_types(poll: &Poll) -> Vec<&str> {
        poll.root
            .pending()
            .iter()
            .map(|event| event.event_type.as_str())
            .collect()
    }

    fn open_poll() -> Poll {
        let mut poll = Poll::load("p1", Events::new()).unwrap();
        poll.append_issue(lunch()).unwrap();
        poll.append_issue(dessert()).unwrap();
        poll.open_polls().unwrap();
        poll
    }

    #[test]
    fn new_poll_starts_with_the_creation_event() {
        let poll = Poll::load("p1", Events::new()).unwrap();

        assert_eq!(pending_types(&poll), vec!["PollCreated"]);
        assert_eq!(
            poll.root.pending()[0].decode::<PollCreated>().unwrap(),
            PollCreated { id: "p1".into() }
        );
        assert!(!poll.is_open);
    }

    #[test]
    fn duplicate_topics_are_ignored() {
        let mut poll = Poll::load("p1", Events::new()).unwrap();

        poll.append_issue(lunch()).unwrap();
        poll.append_issue(lunch()).unwrap();

        assert_eq!(poll.issues, vec![lunch()]);
        assert_eq!(pending_types(&poll), vec!["PollCreated", "IssueAppended"]);
    }

    #[test]
    fn issues_cannot_be_added_to_an_open_poll() {
        let mut poll = open_poll();

        poll.append_issue(Issue {
            topic: "Drinks".into(),
            ..Issue::default()
        })
        .unwrap();

        assert_eq!(poll.issues.len(), 2);
        assert_eq!(pending_types(&poll).last(), Some(&"PollOpened"));
    }

    #[test]
    fn opening_twice_records_a_single_event() {
        let mut poll = Poll::load("p1", Events::new()).unwrap();
        poll.open_polls().unwrap();

        let result = poll.open_polls();

        assert!(matches!(result, Err(Error::Poll(PollError::AlreadyOpen))));
        assert_eq!(pending_types(&poll), vec!["PollCreated", "PollOpened"]);
    }

    #[test]
    fn closing_a_closed_poll_fails() {
        let mut poll = Poll::load("p1", Events::new()).unwrap();

        let result = poll.close_polls();

        assert!(matches!(result, Err(Error::Poll(PollError::AlreadyClosed))));
        assert_eq!(pending_types(&poll), vec!["PollCreated"]);
    }

    #[test]
    fn a_closed_poll_can_be_reopened() {
        let mut poll = open_poll();

        poll.close_polls().unwrap();
        poll.open_polls().unwrap();

        assert!(poll.is_open);
    }

    #[test]
    fn ballots_require_an_open_poll() {
        let mut poll = Poll::load("p1", Events::new()).unwrap();
        poll.append_issue(lunch()).unwrap();

        let result = poll.cast_ballot(vec![Selection::choice("Lunch", 0)]);

        assert!(matches!(result, Err(Error::Poll(PollError::PollClosed))));
        assert!(poll.ballots.is_empty());
    }

    #[test]
    fn a_ballot_with_an_unknown_topic_is_rejected_as_a_whole() {
        let mut poll = open_poll();
        let pending = poll.root.pending().len();

        let result = poll.cast_ballot(vec![
            Selection::choice("Lunch", 0),
            Selection::choice("Drinks", 1),
        ]);

        assert!(matches!(result, Err(Error::Poll(PollError::IssueNotOnPoll))));
        assert!(poll.ballots.is_empty());
        assert_eq!(poll.root.pending().len(), pending);
    }

    #[test]
    fn cast_ballot_binds_issues_and_derives_write_ins() {
        let mut poll = open_poll();
        let mut selection = Selection::choice("Lunch", 0);
        selection.write_in = "Ramen".into();

        poll.cast_ballot(vec![selection, Selection::choice("Dessert", 1)])
            .unwrap();

        let ballot = &poll.ballots[0];
        assert_eq!(ballot[0].issue, lunch());
        assert!(ballot[0].wrote_in);
        assert_eq!(ballot[1].issue, dessert());
        assert!(!ballot[1].wrote_in);
        let cast: BallotCast = poll.root.pending().last().unwrap().decode().unwrap();
        assert_eq!(cast.0[0].issue_topic, "Lunch");
        assert_eq!(cast.0[0].write_in, "Ramen");
    }

    #[test]
    fn replay_rebuilds_the_poll() {
        let mut poll = open_poll();
        poll.cast_ballot(vec![Selection::write_in("Lunch", "Ramen")])
            .unwrap();
        poll.close_polls().unwrap();
        let events = poll.root.flush();

        let replayed = Poll::load("p1", events).unwrap();

        assert_eq!(replayed.id(), "p1");
        assert_eq!(replayed.root.version, 6);
        assert!(!replayed.is_open);
        assert_eq!(replayed.issues, vec![lunch(), dessert()]);
        assert_eq!(replayed.ballots, poll.ballots);
    }

    #[test]
    fn snapshot_restores_the_poll() {
        let mut poll = open_poll();
        let mut events = poll.root.flush();
        poll.root.version = events.last_version();
        let snapshot = poll.snapshot().unwrap();
        let last = events.0.len() - 1;
        events.0[last].snapshot = Some(snapshot);

        let restored = Poll::load("p1", events).unwrap();

        assert!(restored.is_open);
        assert_eq!(restored.issues, poll.issues);
        assert_eq!(restored.root.version, 4);
    }

    #[test]
    fn unknown_events_are_skipped_during_replay() {
        let events = Events(vec![
            Event {
                id: "p1".into(),
                version: 1,
                event_type: PollCreated::NAME.into(),
                timestamp: 0,
                data: Some(Payload::from_json(r#"{"id":"p1"}"#).unwrap()),
                snapshot: None,
            },
            Event {
                id: "p1".into(),
                version: 2,
                event_type: "PollArchived".into(),
                timestamp: 0,
                data: None,
                snapshot: None,
            },
        ]);

        let poll = Poll::load("p1", events).unwrap();

        assert_eq!(poll.root.version, 2);
        assert!(!poll.is_open);
    }
}
