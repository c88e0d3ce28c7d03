//! The `refresh` subcommand: copies master record edits into cached items.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use ballotcache_lib::{CacheRefresher, RefreshSummary, Settings};
use clap::Args;

use crate::output::{build_summary_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct RefreshArgs {
    /// Office permanent id
    #[arg(long, conflicts_with_all = ["measure", "election"])]
    pub office: Option<String>,

    /// Measure permanent id
    #[arg(long, conflicts_with = "election")]
    pub measure: Option<String>,

    /// Refresh every office and measure on an election's ballots
    #[arg(long)]
    pub election: Option<i64>,
}

pub fn run(args: &RefreshArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let refresher = CacheRefresher::new(Arc::new(Mutex::new(super::open_db(settings)?)));

    let summary = match (&args.office, &args.measure, args.election) {
        (Some(office), _, _) => RefreshSummary {
            offices: 1,
            items_updated: refresher.refresh_office(office)?,
            ..Default::default()
        },
        (_, Some(measure), _) => RefreshSummary {
            measures: 1,
            items_updated: refresher.refresh_measure(measure)?,
            ..Default::default()
        },
        (_, _, Some(election_id)) => refresher.refresh_election(election_id)?,
        _ => bail!("pass one of --office, --measure or --election"),
    };

    if !summary.missing.is_empty() {
        eprintln!("{} referenced records have no master data", summary.missing.len());
    }
    print_rows(build_summary_rows(&summary), &summary, format)
}
