//! The `resolve` subcommand: finds and records the ballot for one voter.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use ballotcache_lib::{BallotRef, BallotResolver, ResolveRequest, Settings};
use clap::Args;

use crate::output::{build_resolution_row, print_rows, OutputFormat};

#[derive(Args)]
pub struct ResolveArgs {
    /// Voter id
    #[arg(long)]
    pub voter: i64,

    /// Address as the voter typed it
    #[arg(long, default_value = "")]
    pub address: String,

    /// Restrict to one election
    #[arg(long)]
    pub election: Option<i64>,

    /// Permanent ballot id (wv..ballot..) or public shortcut
    #[arg(long)]
    pub ballot: Option<String>,

    /// Search radius in miles (default from settings)
    #[arg(long)]
    pub radius: Option<f64>,
}

pub async fn run(args: &ResolveArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let db = Arc::new(Mutex::new(super::open_db(settings)?));
    let geocoder = super::geocoder(settings)?;
    let resolver = BallotResolver::new(Arc::clone(&geocoder), db)
        .with_radius(args.radius.unwrap_or(settings.search_radius_miles));

    let request = ResolveRequest {
        voter_id: args.voter,
        address_text: args.address.clone(),
        election_id: args.election,
        ballot_ref: args.ballot.as_deref().map(BallotRef::parse),
    };
    let resolution = resolver.resolve(&request).await;

    if !resolution.is_found() {
        eprintln!(
            "No ballot for voter {}: {}",
            args.voter,
            resolution.message.as_deref().unwrap_or("not found")
        );
    }
    if let Some(caveat) = resolution
        .voter_ballot
        .as_ref()
        .map(|b| b.ballot_caveat())
        .filter(|c| !c.is_empty())
    {
        eprintln!("{}", caveat);
    }
    print_rows(vec![build_resolution_row(&resolution)], &resolution, format)
}
