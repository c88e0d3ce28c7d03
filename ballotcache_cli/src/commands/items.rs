//! The `items` subcommand: the ordered offices and measures on one ballot.

use anyhow::Result;
use ballotcache_lib::{BallotRef, Settings};
use clap::Args;

use crate::output::{build_item_rows, print_rows, OutputFormat};

#[derive(Args)]
pub struct ItemsArgs {
    /// Permanent ballot id (wv..ballot..) or public shortcut
    #[arg(long)]
    pub ballot: String,
}

pub fn run(args: &ItemsArgs, settings: &Settings, format: &OutputFormat) -> Result<()> {
    let db = super::open_db(settings)?;
    let items = db.get_ballot_items(&BallotRef::parse(&args.ballot))?;
    eprintln!("{} ballot items", items.len());
    print_rows(build_item_rows(&items), &items, format)
}
