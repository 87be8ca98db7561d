mod app;
mod cli;
mod configuration;
mod error;

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;

use ballotbox::poll::{CastBallot, ClosePoll, CreatePoll, OpenPoll};
use ballotbox::Command;

use app::VotingApp;
use cli::{Cli, Commands};
pub use error::Error;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Create(args) => {
            let command = CreatePoll {
                id: args.id.clone(),
                issues: args.issues(),
            };
            execute(&cli.data_dir, command).await
        }
        Commands::Open { id } => execute(&cli.data_dir, OpenPoll { id }).await,
        Commands::Close { id } => execute(&cli.data_dir, ClosePoll { id }).await,
        Commands::Cast(args) => {
            let command = CastBallot {
                id: args.id.clone(),
                ballot: args.ballot(),
            };
            execute(&cli.data_dir, command).await
        }
        Commands::List => {
            for poll in app::open_polls(&cli.data_dir).await? {
                let topics: Vec<_> = poll.issues.iter().map(|issue| issue.topic.as_str()).collect();
                println!("{}\t{}", poll.id, topics.join(", "));
            }
            Ok(())
        }
    }
}

async fn execute<C: Command>(data_dir: &Path, command: C) -> Result<(), Error> {
    let app = VotingApp::start(data_dir).await?;
    let result = app.execute(command).await;
    app.shutdown().await?;
    result
}
