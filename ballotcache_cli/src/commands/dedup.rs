//! The `dedup` subcommand: heals duplicated locations and items left by
//! concurrent writers.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use ballotcache_lib::{CacheRefresher, Settings};
use clap::Args;

use crate::output::{build_summary_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct DedupArgs {
    /// Only this election (default: all)
    #[arg(long)]
    pub election: Option<i64>,
}

pub fn run(args: &DedupArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let refresher = CacheRefresher::new(Arc::new(Mutex::new(super::open_db(settings)?)));
    let summary = refresher.merge_all_duplicates(args.election)?;
    print_rows(build_summary_rows(&summary), &summary, format)
}
