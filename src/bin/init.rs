//! skirmishd_init - One-time database initialization tool
//!
//! Creates a fresh session database, optionally seeded from roster files.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use skirmishd::init::{init_database, Roster};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// skirmishd database initialization tool
#[derive(Parser, Debug)]
#[command(
    name = "skirmishd_init",
    version,
    about = "Initialize a new skirmishd database"
)]
struct Args {
    /// Path to SQLite database file to create (must not exist)
    #[arg(short, long)]
    database: PathBuf,

    /// Roster JSON files, one session each (can be specified multiple times)
    #[arg(long = "roster")]
    rosters: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skirmishd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    let mut rosters = Vec::with_capacity(args.rosters.len());
    for path in &args.rosters {
        if !path.exists() {
            bail!("Roster file not found: {}", path.display());
        }
        rosters.push(Roster::from_file(path)?);
    }

    let ids = init_database(&args.database, rosters).await?;
    for id in ids {
        println!("{}", id);
    }

    Ok(())
}
