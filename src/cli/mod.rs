//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod common;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use cardbridge::utils::logging::init_logging;
use cardbridge::CardBridge;

use self::common::{emit, load_session, Session};

#[derive(Parser)]
#[command(name = "cardbridge")]
#[command(version)]
#[command(about = "Fetch, supervise and relay a vendored commit-card generator", long_about = None)]
struct Cli {
    /// Host configuration file (defaults to ~/.cardbridge/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap, start the watcher and scheduler, run until Ctrl-C
    Run,
    /// Download, verify and extract the card generator, then report status
    Bootstrap,
    /// Show generator, monitor and subscriber status
    Status,
    /// Show the host configuration with secrets masked
    Config,
    /// Ask the card generator to check one repository now
    Check {
        /// Repository owner
        owner: String,
        /// Repository name
        repo: String,
    },
    /// Register a repository with the card generator and the host config
    Add {
        /// Repository owner
        owner: String,
        /// Repository name
        repo: String,
        /// Branch to follow
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// List repositories known to the card generator
    List,
    /// List notification destinations
    Subscribers,
    /// Add a notification destination
    Subscribe {
        /// Destination identifier, e.g. qq:GroupMessage:123
        destination: String,
    },
    /// Remove a notification destination
    Unsubscribe {
        /// Destination identifier
        destination: String,
    },
    /// Send the newest generated card to every destination
    TestNotify,
    /// Show version information
    Version,
}

/// Entry point: parse args and dispatch the command.
///
/// Every command except `version` loads the host config first and
/// initializes logging from it.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
        Some(Commands::Version) => {
            cmd_version();
            Ok(())
        }
        Some(Commands::Run) => run::cmd_run(open_session(config_path)?).await,
        Some(Commands::Bootstrap) => run::cmd_bootstrap(open_session(config_path)?).await,
        Some(Commands::Status) => emit(probe(config_path)?.status().await),
        Some(Commands::Config) => emit(probe(config_path)?.show_config()),
        Some(Commands::Check { owner, repo }) => {
            emit(probe(config_path)?.check_repository(&owner, &repo).await)
        }
        Some(Commands::Add {
            owner,
            repo,
            branch,
        }) => emit(
            probe(config_path)?
                .add_repository(&owner, &repo, &branch)
                .await,
        ),
        Some(Commands::List) => emit(probe(config_path)?.list_repositories().await),
        Some(Commands::Subscribers) => emit(probe(config_path)?.list_subscribers()),
        Some(Commands::Subscribe { destination }) => {
            emit(probe(config_path)?.subscribe(&destination))
        }
        Some(Commands::Unsubscribe { destination }) => {
            emit(probe(config_path)?.unsubscribe(&destination))
        }
        Some(Commands::TestNotify) => emit(probe(config_path)?.test_notification().await),
    }
}

/// Load the session and initialize logging from it.
fn open_session(config_path: Option<&Path>) -> Result<Session> {
    let session = load_session(config_path)?;
    if let Err(e) = init_logging(&session.config.logging) {
        eprintln!("Warning: {}", e);
    }
    Ok(session)
}

/// Filesystem-only bridge for one-off commands; never downloads.
fn probe(config_path: Option<&Path>) -> Result<CardBridge> {
    let session = open_session(config_path)?;
    let deps = session.deps()?;
    Ok(CardBridge::probe(deps, session.config))
}

fn cmd_version() {
    println!("cardbridge {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Lifecycle manager for a vendored commit-card generator");
}
