use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ballotbox::{Issue, Selection};

/// Creates polls, runs them and lists the open ones.
#[derive(Debug, Parser)]
#[command(name = "ballotbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the event and view tables.
    #[arg(long, env = "BALLOTBOX_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a poll.
    Create(CreateArgs),
    /// Open a poll to ballots.
    Open { id: String },
    /// Close a poll.
    Close { id: String },
    /// Cast a ballot on an open poll.
    Cast(CastArgs),
    /// List the open polls.
    List,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub id: String,

    /// An issue, as `TOPIC=CHOICE,CHOICE,...`.
    #[arg(long = "issue", value_parser = parse_issue)]
    pub issues: Vec<Issue>,

    /// Let voters write in their own answer on every issue.
    #[arg(long)]
    pub write_in: bool,
}

impl CreateArgs {
    pub fn issues(&self) -> Vec<Issue> {
        self.issues
            .iter()
            .cloned()
            .map(|issue| Issue {
                can_write_in: self.write_in,
                ..issue
            })
            .collect()
    }
}

#[derive(Debug, Args)]
pub struct CastArgs {
    pub id: String,

    /// Pick a choice, as `TOPIC=INDEX`.
    #[arg(long = "select", value_parser = parse_choice)]
    pub selections: Vec<(String, usize)>,

    /// Write in an answer, as `TOPIC=TEXT`.
    #[arg(long = "write-in", value_parser = parse_pair)]
    pub write_ins: Vec<(String, String)>,

    /// A comment attached to every selection.
    #[arg(long, default_value = "")]
    pub comment: String,
}

impl CastArgs {
    pub fn ballot(&self) -> Vec<Selection> {
        let choices = self
            .selections
            .iter()
            .map(|(topic, index)| Selection::choice(topic.as_str(), *index));
        let write_ins = self
            .write_ins
            .iter()
            .map(|(topic, answer)| Selection::write_in(topic.as_str(), answer.as_str()));
        choices
            .chain(write_ins)
            .map(|selection| Selection {
                comment: self.comment.clone(),
                ..selection
            })
            .collect()
    }
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, rest)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), rest.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

fn parse_choice(value: &str) -> Result<(String, usize), String> {
    let (topic, index) = parse_pair(value)?;
    let index = index
        .parse()
        .map_err(|_| format!("`{index}` is not a choice index"))?;
    Ok((topic, index))
}

fn parse_issue(value: &str) -> Result<Issue, String> {
    let (topic, choices) = parse_pair(value)?;
    Ok(Issue {
        topic,
        choices: choices
            .split(',')
            .map(str::trim)
            .filter(|choice| !choice.is_empty())
            .map(String::from)
            .collect(),
        can_write_in: false,
    })
}
