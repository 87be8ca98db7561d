use serde::{Deserialize, Serialize};

use crate::poll::{Issue, Selection};
use crate::{DomainEvent, Error, Event};

/// A poll was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct PollCreated {
    /// The poll id.
    pub id: String,
}

/// Polls were opened: ballots can be cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct PollOpened {
    /// The poll id.
    pub id: String,
}

/// Polls were closed: no more ballots are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct PollClosed {
    /// The poll id.
    pub id: String,
}

/// An issue was added to a poll that was not open yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct IssueAppended {
    /// The topic of the issue, unique within the poll.
    pub topic: String,
    /// The choices offered to voters.
    pub choices: Vec<String>,
    /// Whether voters may write in their own answer.
    pub can_write_in: bool,
}

impl From<&Issue> for IssueAppended {
    fn from(issue: &Issue) -> Self {
        Self {
            topic: issue.topic.clone(),
            choices: issue.choices.clone(),
            can_write_in: issue.can_write_in,
        }
    }
}

impl From<IssueAppended> for Issue {
    fn from(event: IssueAppended) -> Self {
        Self {
            topic: event.topic,
            choices: event.choices,
            can_write_in: event.can_write_in,
        }
    }
}

/// One selection of a cast ballot, referring to its issue by topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSelection {
    /// The topic of the issue.
    pub issue_topic: String,
    /// Whether the voter wrote in an answer.
    pub wrote_in: bool,
    /// The index of the selected choice.
    pub choice: usize,
    /// The written in answer.
    pub write_in: String,
    /// A free-form comment.
    pub comment: String,
}

impl From<&Selection> for BallotSelection {
    fn from(selection: &Selection) -> Self {
        Self {
            issue_topic: selection.issue.topic.clone(),
            wrote_in: !selection.write_in.is_empty(),
            choice: selection.choice,
            write_in: selection.write_in.clone(),
            comment: selection.comment.clone(),
        }
    }
}

/// A ballot was cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct BallotCast(pub Vec<BallotSelection>);

/// The closed set of events of a poll stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// See [PollCreated].
    PollCreated(PollCreated),
    /// See [PollOpened].
    PollOpened(PollOpened),
    /// See [PollClosed].
    PollClosed(PollClosed),
    /// See [IssueAppended].
    IssueAppended(IssueAppended),
    /// See [BallotCast].
    BallotCast(BallotCast),
}

impl PollEvent {
    /// The record types of every poll event.
    pub const TYPES: [&'static str; 5] = [
        PollCreated::NAME,
        PollOpened::NAME,
        PollClosed::NAME,
        IssueAppended::NAME,
        BallotCast::NAME,
    ];

    /// Decodes a record into a typed poll event.
    ///
    /// Events that only carry the poll id take it from the record, whatever their data.
    pub fn decode(event: &Event) -> Result<Self, Error> {
        let id = || event.id.clone();
        match event.event_type.as_str() {
            name if name == PollCreated::NAME => Ok(Self::PollCreated(PollCreated { id: id() })),
            name if name == PollOpened::NAME => Ok(Self::PollOpened(PollOpened { id: id() })),
            name if name == PollClosed::NAME => Ok(Self::PollClosed(PollClosed { id: id() })),
            name if name == IssueAppended::NAME => Ok(Self::IssueAppended(event.decode()?)),
            name if name == BallotCast::NAME => Ok(Self::BallotCast(event.decode()?)),
            name => Err(Error::UnhandledEventType(name.to_string())),
        }
    }

    /// The record type of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PollCreated(_) => PollCreated::NAME,
            Self::PollOpened(_) => PollOpened::NAME,
            Self::PollClosed(_) => PollClosed::NAME,
            Self::IssueAppended(_) => IssueAppended::NAME,
            Self::BallotCast(_) => BallotCast::NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    fn record(event_type: &str, data: Option<&str>) -> Event {
        Event {
            id: "p1".into(),
            version: 1,
            event_type: event_type.into(),
            timestamp: 0,
            data: data.map(|data| Payload::from_json(data).unwrap()),
            snapshot: None,
        }
    }

    #[test]
    fn names_are_the_type_names() {
        assert_eq!(
            PollEvent::TYPES,
            ["PollCreated", "PollOpened", "PollClosed", "IssueAppended", "BallotCast"]
        );
    }

    #[test]
    fn id_only_events_take_the_record_id() {
        let decoded = PollEvent::decode(&record("PollOpened", None)).unwrap();

        assert_eq!(decoded, PollEvent::PollOpened(PollOpened { id: "p1".into() }));
    }

    #[test]
    fn issue_appended_is_decoded_from_data() {
        let event = record(
            "IssueAppended",
            Some(r#"{"topic":"Lunch","choices":["Soup","Salad"],"can_write_in":true}"#),
        );

        let decoded = PollEvent::decode(&event).unwrap();

        assert_eq!(
            decoded,
            PollEvent::IssueAppended(IssueAppended {
                topic: "Lunch".into(),
                choices: vec!["Soup".into(), "Salad".into()],
                can_write_in: true,
            })
        );
        assert_eq!(decoded.name(), "IssueAppended");
    }

    #[test]
    fn ballot_cast_without_data_is_an_error() {
        let result = PollEvent::decode(&record("BallotCast", None));

        assert!(matches!(result, Err(Error::MissingPayload("BallotCast"))));
    }

    #[test]
    fn unknown_types_are_unhandled() {
        let result = PollEvent::decode(&record("PollArchived", None));

        assert!(matches!(result, Err(Error::UnhandledEventType(name)) if name == "PollArchived"));
    }

    #[test]
    fn ballot_cast_is_a_json_array() {
        let event = BallotCast(vec![BallotSelection {
            issue_topic: "Lunch".into(),
            wrote_in: false,
            choice: 1,
            write_in: String::new(),
            comment: String::new(),
        }]);

        assert_eq!(
            event.to_payload().unwrap().as_str(),
            r#"[{"issue_topic":"Lunch","wrote_in":false,"choice":1,"write_in":"","comment":""}]"#
        );
    }
}
