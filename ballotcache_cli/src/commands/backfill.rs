//! The `backfill-coords` subcommand: geocodes ballot locations that have a
//! normalized address but no coordinates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use ballotcache_lib::{CacheRefresher, Settings};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::output::{build_summary_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct BackfillArgs {
    /// Maximum locations to geocode this run (default: all)
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn run(args: &BackfillArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let refresher = CacheRefresher::new(Arc::new(Mutex::new(super::open_db(settings)?)));
    let geocoder = super::geocoder(settings)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("[{elapsed_precise}] {spinner} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("geocoding ballot locations...");

    let summary = refresher.backfill_coordinates(&geocoder, args.limit).await?;

    pb.finish_with_message(format!(
        "{} updated, {} not found",
        summary.updated, summary.not_found
    ));
    if summary.quota_exceeded {
        eprintln!("Stopped early: geocoder quota exceeded. Re-run later to continue.");
    }
    let stats = geocoder.stats();
    eprintln!(
        "Geocoder: {} requests, {} keyless fallbacks, {} cache hits",
        stats.requests_made, stats.keyless_fallbacks, stats.cache_hits
    );
    print_rows(build_summary_rows(&summary), &summary, format)
}
