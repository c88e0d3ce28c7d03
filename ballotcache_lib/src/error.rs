//! Error types for the library layer.

use thiserror::Error;

use crate::db::DbError;

/// Errors produced while resolving, caching or refreshing ballots.
///
/// The first group mirrors the resolution outcomes a caller can act on;
/// [`crate::resolver::BallotResolver`] turns them into a status rather than
/// returning them. Duplicate-row conditions are healed inside the store and
/// only surface as [`DbError::DuplicateRows`] if healing gives up.
#[derive(Error, Debug)]
pub enum BallotError {
    #[error("address text is empty")]
    AddressMissing,
    #[error("geocoder quota exceeded on both keyed and keyless requests")]
    GeocoderQuotaExceeded,
    #[error("no ballot found for '{0}' after geocoding and text search")]
    GeocoderNoResult(String),
    #[error("no stored ballot within {radius_miles} miles")]
    NoBallotWithinRadius { radius_miles: f64 },
    #[error("no election with stored ballots for state {0}")]
    NoElectionDataForState(String),
    #[error("master record not found: {0}")]
    MasterRecordNotFound(String),
    #[error("ballot not found: {0}")]
    BallotNotFound(String),
    /// User-provided input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("geocoder error: {0}")]
    Geocoder(#[from] geocoder_api::Error),
}

impl From<rusqlite::Error> for BallotError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DbError::from(e))
    }
}
