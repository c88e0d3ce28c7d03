//! Ballot resolution and ballot item caching.
//!
//! Maps a voter's free-text address to a stored ballot for an election,
//! keeps the denormalized ballot item cache in step with the master office
//! and measure records, and remembers which ballot each voter was shown.
//! Geocoding goes through the `geocoder_api` crate behind a rate-limited,
//! cached adapter.

pub mod address;
pub mod ballot_item;
pub mod ballot_location;
pub mod cache;
pub mod config;
pub mod db;
pub mod distance;
pub mod election;
pub mod error;
pub mod geocoder;
pub mod import;
pub mod master;
pub mod rate_limiter;
pub mod refresher;
pub mod resolver;
pub mod validation;
pub mod voter_ballot;

pub use geocoder_api;
pub use geocoder_api::GeocodedAddress;

pub use ballot_item::{BallotEntry, BallotEntryFields, BallotSubject};
pub use ballot_location::{
    BallotLocation, BallotLocationFields, BallotRef, LocationFilter, LocationKey, NearbyBallot,
};
pub use config::{ConfigError, GeocoderSettings, Settings};
pub use db::{Db, DbError};
pub use distance::GeoPoint;
pub use election::{DateDirection, Election, ElectionCatalog};
pub use error::BallotError;
pub use geocoder::{GeocodeOutcome, GeocoderAdapter, RetryConfig};
pub use import::{ImportError, ImportSummary};
pub use master::{ContestMeasure, ContestOffice, MasterRecordProvider};
pub use refresher::{BackfillSummary, CacheRefresher, DedupSummary, RefreshSummary};
pub use resolver::{BallotResolver, MatchMethod, Resolution, ResolutionStatus, ResolveRequest};
pub use voter_ballot::{VoterBallot, VoterBallotCache, VoterBallotLookup, VoterBallotRecord};
