//! The `locations` subcommand: browse cached ballot locations.

use anyhow::Result;
use ballotcache_lib::validation::validate_state;
use ballotcache_lib::{LocationFilter, Settings};
use clap::Args;

use crate::output::{build_location_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct LocationsArgs {
    /// Filter by election id
    #[arg(long)]
    pub election: Option<i64>,

    /// Filter by state code (e.g. MS)
    #[arg(long)]
    pub state: Option<String>,

    /// Match address text, display name or city
    #[arg(long)]
    pub search: Option<String>,

    /// Only ballots offered as selectable choices
    #[arg(long)]
    pub display_only: bool,

    /// Include voter-owned rows (these hold voter addresses)
    #[arg(long)]
    pub include_voters: bool,

    /// Maximum rows
    #[arg(long, default_value = "100")]
    pub limit: usize,
}

pub fn run(args: &LocationsArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let state_code = args.state.as_deref().map(validate_state).transpose()?;
    let db = super::open_db(settings)?;
    let filter = LocationFilter {
        election_id: args.election,
        state_code,
        search: args.search.clone(),
        display_option_on: args.display_only.then_some(true),
        include_voter_rows: args.include_voters,
        limit: Some(args.limit),
    };
    let locations = db.list_ballot_locations(&filter)?;

    if let Some(election_id) = args.election {
        eprintln!(
            "{} ballots offered as choices for election {}",
            db.count_display_option_on(election_id)?,
            election_id
        );
    }
    print_rows(build_location_rows(&locations), &locations, format)
}
