mod agent;
mod commit;
mod discovery;
mod error;
mod pipeline;
mod preferences;
mod search;
mod store;
mod transcript;

use agent::AgentKind;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gitscribe",
    version,
    about = "Attach AI coding-session conversations to the commits they produce"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a conversation from an agent hook payload on stdin
    Store {
        /// Agent whose hook produced the payload
        #[arg(long, value_enum)]
        agent: AgentKind,
    },
    /// Attach the most recently active session to the commit that just landed
    PostCommit,
    /// Search stored conversations for a substring
    Search { query: String },
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Store { agent } => {
            let payload = read_stdin()?;
            let outcome = pipeline::run_store(agent, &payload)?;
            tracing::debug!(?outcome, "store finished");
        }
        Command::PostCommit => {
            let cwd = std::env::current_dir()?;
            let outcome = pipeline::run_post_commit(&cwd)?;
            tracing::debug!(?outcome, "post-commit finished");
        }
        Command::Search { query } => {
            let cwd = std::env::current_dir()?;
            let matches = pipeline::Pipeline::open(&cwd)?.search(&query)?;
            if matches.is_empty() {
                println!("no matching conversations found");
                return Ok(());
            }
            for m in &matches {
                let short = m.commit.get(..8).unwrap_or(&m.commit);
                println!("{short} {}", m.subject);
                println!("    {}", m.snippet);
            }
        }
    }
    Ok(())
}

fn main() {
    let filter =
        EnvFilter::try_from_env("GITSCRIBE_LOG").unwrap_or_else(|_| EnvFilter::new("gitscribe=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("gitscribe: {err:#}");
        process::exit(2);
    }
}
