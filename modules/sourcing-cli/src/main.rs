use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sourcing_core::{PgStore, SearchQuery, Sourcing, SourcingConfig};

#[derive(Parser)]
#[command(name = "sourcing", about = "Resumable candidate discovery sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and run its first company batch
    Create {
        /// Search criteria as a JSON object
        #[arg(long)]
        query: String,

        /// Target companies, comma-separated
        #[arg(long, value_delimiter = ',', required = true)]
        companies: Vec<String>,

        /// Companies per batch (defaults to DEFAULT_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Run the next company batch of a session
    Advance { session_id: Uuid },

    /// Materialize the next unfetched candidates of a session
    Fetch {
        session_id: Uuid,

        #[arg(long, default_value_t = 20)]
        batch_size: usize,
    },

    /// List active sessions, most recently accessed first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one session's progress
    Status { session_id: Uuid },

    /// Soft-delete a session
    Deactivate { session_id: Uuid },

    /// Soft-delete every active session
    DeactivateAll,

    /// Hard-delete every session (cached records are kept)
    Purge {
        /// Required; purging cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Run pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Results go to stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = SourcingConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    if let Commands::Migrate = cli.command {
        PgStore::new(pool).migrate().await?;
        tracing::info!("Migrations applied");
        return Ok(());
    }

    let sourcing = Sourcing::from_config(pool, &config);

    match cli.command {
        Commands::Create {
            query,
            companies,
            batch_size,
        } => {
            let query: serde_json::Value =
                serde_json::from_str(&query).context("--query must be valid JSON")?;
            let companies: Vec<String> = companies
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            print(&sourcing.create_session(SearchQuery(query), &companies, batch_size).await?)
        }
        Commands::Advance { session_id } => print(&sourcing.advance_batch(session_id).await?),
        Commands::Fetch {
            session_id,
            batch_size,
        } => print(&sourcing.fetch_next(session_id, batch_size).await?),
        Commands::List { limit } => print(&sourcing.list_active_sessions(limit).await?),
        Commands::Status { session_id } => print(&sourcing.session_status(session_id).await?),
        Commands::Deactivate { session_id } => {
            sourcing.deactivate_session(session_id).await?;
            print(&serde_json::json!({ "session_id": session_id, "is_active": false }))
        }
        Commands::DeactivateAll => {
            let count = sourcing.deactivate_all_sessions().await?;
            print(&serde_json::json!({ "deactivated": count }))
        }
        Commands::Purge { yes } => {
            if !yes {
                anyhow::bail!("purge deletes every session; pass --yes to confirm");
            }
            let count = sourcing.purge_all_sessions().await?;
            print(&serde_json::json!({ "purged": count }))
        }
        Commands::Migrate => Ok(()),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
