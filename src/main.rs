use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::*;
use service::{config::Config, logging::Logger};
use session_auth::{FileStore, Session, SessionConfig};
use std::sync::Arc;

mod commands;

#[derive(Parser)]
#[command(name = "records_client", version)]
#[command(about = "Command-line client for the records service")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the login URL, then read credential messages from stdin
    Login,
    /// End the session, locally and on the backend
    Logout,
    /// Show whether a session exists and when its access token expires
    Status,
    /// Renew the access token now
    Refresh,
    /// List tag names
    Tags,
    /// Semantic search over your records
    Search {
        query: String,
        /// Only records carrying this tag (repeatable)
        #[arg(long = "tag", short)]
        tags: Vec<String>,
        /// Earliest creation date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<chrono::NaiveDate>,
        /// Latest creation date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<chrono::NaiveDate>,
    },
    /// Show one record
    Show { id: domain::Id },
    /// Create a record
    Add {
        name: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long = "tag", short)]
        tags: Vec<String>,
    },
    /// Replace a record's name, notes and tags
    Edit {
        id: domain::Id,
        name: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long = "tag", short)]
        tags: Vec<String>,
    },
    /// Delete a record
    Delete { id: domain::Id },
}

#[tokio::main]
async fn main() -> Result<()> {
    Config::load_env_file();
    let cli = Cli::parse();
    Logger::init_logger(&cli.config);

    let session = start_session(&cli.config).await?;
    debug!("Running command against {}", cli.config.api_base_url());

    match cli.command {
        Command::Login => commands::login(&session).await,
        Command::Logout => commands::logout(&session).await,
        Command::Status => commands::status(&session),
        Command::Refresh => commands::refresh(&session).await,
        Command::Tags => commands::tags(&session).await,
        Command::Search {
            query,
            tags,
            from,
            to,
        } => commands::search(&session, query, tags, from, to).await,
        Command::Show { id } => commands::show(&session, id).await,
        Command::Add { name, notes, tags } => commands::add(&session, name, notes, tags).await,
        Command::Edit {
            id,
            name,
            notes,
            tags,
        } => commands::edit(&session, id, name, notes, tags).await,
        Command::Delete { id } => commands::delete(&session, id).await,
    }
}

async fn start_session(config: &Config) -> Result<Session> {
    let trusted_origin = config.trusted_origin()?;
    let store = Arc::new(FileStore::new(config.store_path(), &trusted_origin));
    debug!("Token store at {}", store.path().display());

    let session_config = SessionConfig::new(config.api_base_url(), trusted_origin)
        .with_refresh_lead_time(config.refresh_lead_time())
        .with_logout_timeout(config.logout_timeout())
        .with_request_timeout(config.request_timeout())
        .with_max_transient_retries(config.max_transient_retries)
        .with_user_agent(concat!("records_client/", env!("CARGO_PKG_VERSION")));

    Session::start(session_config, store)
        .await
        .context("Failed to start session")
}
