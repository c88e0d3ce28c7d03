mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use ballotcache_lib::Settings;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "ballotcache")]
#[command(about = "Resolve voter addresses to cached ballots and maintain the ballot item cache")]
struct Cli {
    /// Output format: table, json or csv
    #[arg(long, default_value = "table", global = true)]
    output: String,

    /// Settings file (defaults to ./ballotcache.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the settings file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load elections, offices, measures and map-point ballots from YAML
    Import(commands::import::ImportArgs),
    /// Find the ballot for a voter's address
    Resolve(commands::resolve::ResolveArgs),
    /// List the items on a ballot
    Items(commands::items::ItemsArgs),
    /// List cached ballot locations
    Locations(commands::locations::LocationsArgs),
    /// Show, list or delete a voter's saved ballots
    VoterBallots(commands::voter_ballots::VoterBallotsArgs),
    /// Push master office/measure changes into cached ballot items
    Refresh(commands::refresh::RefreshArgs),
    /// Merge duplicated ballot locations and items
    Dedup(commands::dedup::DedupArgs),
    /// Geocode ballot locations that have an address but no coordinates
    BackfillCoords(commands::backfill::BackfillArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ballotcache=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        _ => OutputFormat::Table,
    };

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    match &cli.command {
        Commands::Import(args) => commands::import::run(args, &settings, &format)?,
        Commands::Resolve(args) => commands::resolve::run(args, &settings, &format).await?,
        Commands::Items(args) => commands::items::run(args, &settings, &format)?,
        Commands::Locations(args) => commands::locations::run(args, &settings, &format)?,
        Commands::VoterBallots(args) => {
            commands::voter_ballots::run(args, &settings, &format).await?
        }
        Commands::Refresh(args) => commands::refresh::run(args, &settings, &format)?,
        Commands::Dedup(args) => commands::dedup::run(args, &settings, &format)?,
        Commands::BackfillCoords(args) => commands::backfill::run(args, &settings, &format).await?,
    }

    Ok(())
}
