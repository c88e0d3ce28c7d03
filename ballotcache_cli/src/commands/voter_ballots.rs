//! The `voter-ballots` subcommand: a voter's saved ballot choices.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use ballotcache_lib::{Settings, VoterBallotCache, VoterBallotLookup};
use clap::Args;

use crate::output::{build_voter_ballot_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct VoterBallotsArgs {
    /// Voter id
    #[arg(long)]
    pub voter: i64,

    /// Look up by election id
    #[arg(long, conflicts_with_all = ["ballot", "shortcut", "address"])]
    pub election: Option<i64>,

    /// Look up by permanent ballot id
    #[arg(long, conflicts_with_all = ["shortcut", "address"])]
    pub ballot: Option<String>,

    /// Look up by ballot shortcut
    #[arg(long, conflicts_with = "address")]
    pub shortcut: Option<String>,

    /// Look up by the address the voter typed
    #[arg(long)]
    pub address: Option<String>,

    /// Delete the matching row instead of showing it
    #[arg(long)]
    pub delete: bool,
}

impl VoterBallotsArgs {
    fn lookup(&self) -> Option<VoterBallotLookup> {
        if let Some(id) = self.election {
            Some(VoterBallotLookup::Election(id))
        } else if let Some(ref b) = self.ballot {
            Some(VoterBallotLookup::BallotLocation(b.clone()))
        } else if let Some(ref s) = self.shortcut {
            Some(VoterBallotLookup::Shortcut(s.clone()))
        } else {
            self.address.clone().map(VoterBallotLookup::AddressText)
        }
    }
}

pub async fn run(args: &VoterBallotsArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let db = Arc::new(Mutex::new(super::open_db(settings)?));
    let cache = VoterBallotCache::new(db, Some(super::geocoder(settings)?));

    let Some(lookup) = args.lookup() else {
        if args.delete {
            bail!("--delete needs --election, --ballot, --shortcut or --address");
        }
        let ballots = cache.list(args.voter)?;
        return print_rows(build_voter_ballot_rows(&ballots), &ballots, format);
    };

    if args.delete {
        let removed = cache.delete(args.voter, &lookup)?;
        eprintln!("Deleted {} voter ballot rows", removed);
        return Ok(());
    }

    let ballots: Vec<_> = cache.get(args.voter, &lookup).await?.into_iter().collect();
    if ballots.is_empty() {
        eprintln!("No saved ballot for voter {}", args.voter);
    }
    print_rows(build_voter_ballot_rows(&ballots), &ballots, format)
}
