//! The `import` subcommand: loads master data and map-point ballots from YAML.

use std::path::PathBuf;

use anyhow::Result;
use ballotcache_lib::{import, Settings};
use clap::Args;

use crate::output::{build_summary_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct ImportArgs {
    /// YAML file with elections, offices, measures and map_point_ballots
    #[arg(long)]
    pub file: PathBuf,
}

pub fn run(args: &ImportArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let db = super::open_db(settings)?;
    let summary = import::import_file(&db, &args.file)?;
    print_rows(build_summary_rows(&summary), &summary, format)
}
