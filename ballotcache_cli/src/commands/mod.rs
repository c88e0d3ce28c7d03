//! CLI subcommand implementations.

pub mod backfill;
pub mod dedup;
pub mod import;
pub mod items;
pub mod locations;
pub mod refresh;
pub mod resolve;
pub mod voter_ballots;

use std::sync::Arc;

use anyhow::{Context, Result};
use ballotcache_lib::{Db, GeocoderAdapter, Settings};

/// Opens the configured database and applies the schema.
pub fn open_db(settings: &Settings) -> Result<Db> {
    let db = Db::open(&settings.database_path)
        .with_context(|| format!("opening {}", settings.database_path.display()))?
        .with_site_prefix(&settings.site_prefix);
    db.init()?;
    Ok(db)
}

pub fn geocoder(settings: &Settings) -> Result<Arc<GeocoderAdapter>> {
    let adapter = GeocoderAdapter::from_settings(&settings.geocoder)
        .context("building geocoder client")?;
    Ok(Arc::new(adapter))
}
