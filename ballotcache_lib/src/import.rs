//! Master-data import from YAML: elections, office and measure summaries,
//! and map-point ballots with their items.
//!
//! Every record is upserted, so importing the same file twice leaves the
//! store unchanged apart from timestamps.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::ballot_item::{BallotEntryFields, BallotSubject};
use crate::ballot_location::{BallotLocationFields, LocationKey};
use crate::db::{Db, DbError};
use crate::election::Election;
use crate::master::{ContestMeasure, ContestOffice, MasterRecordProvider};
use crate::validation::{validate_shortcut, validate_state};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse import YAML: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("map point {map_point}: {reason}")]
    InvalidBallot { map_point: String, reason: String },
    #[error("map point {map_point} references unknown {kind} {we_vote_id}")]
    UnknownReference {
        map_point: String,
        kind: &'static str,
        we_vote_id: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImportFile {
    pub elections: Vec<Election>,
    pub offices: Vec<ContestOffice>,
    pub measures: Vec<ContestMeasure>,
    pub map_point_ballots: Vec<MapPointBallot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapPointBallot {
    pub map_point: String,
    pub election_id: i64,
    pub text_for_map_search: String,
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub display_option_on: bool,
    #[serde(default)]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub items: Vec<ImportItem>,
}

/// One line of a map-point ballot. Exactly one of `office` or `measure`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportItem {
    #[serde(default)]
    pub office: Option<String>,
    #[serde(default)]
    pub measure: Option<String>,
    #[serde(default)]
    pub local_ballot_order: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub elections: usize,
    pub offices: usize,
    pub measures: usize,
    pub locations_created: usize,
    pub locations_updated: usize,
    pub items: usize,
}

pub fn parse_import(yaml_content: &str) -> Result<ImportFile, ImportError> {
    Ok(serde_yml::from_str(yaml_content)?)
}

pub fn import_file(db: &Db, path: &Path) -> Result<ImportSummary, ImportError> {
    let content = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    import_master_data(db, &parse_import(&content)?)
}

/// Imports the whole file in one transaction; any invalid record leaves
/// the store as it was.
pub fn import_master_data(db: &Db, file: &ImportFile) -> Result<ImportSummary, ImportError> {
    let tx = db.write_tx()?;
    let summary = import_records(db, file)?;
    tx.commit()?;

    info!(
        "Imported {} elections, {} offices, {} measures, {} map-point ballots ({} new), {} items",
        summary.elections,
        summary.offices,
        summary.measures,
        summary.locations_created + summary.locations_updated,
        summary.locations_created,
        summary.items
    );
    Ok(summary)
}

/// Master summaries first so item display fields can be copied from them.
fn import_records(db: &Db, file: &ImportFile) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();

    for election in &file.elections {
        db.upsert_election(election)?;
        summary.elections += 1;
    }
    for office in &file.offices {
        db.upsert_office(office)?;
        summary.offices += 1;
    }
    for measure in &file.measures {
        db.upsert_measure(measure)?;
        summary.measures += 1;
    }

    let elections: HashMap<i64, &Election> =
        file.elections.iter().map(|e| (e.election_id, e)).collect();

    for ballot in &file.map_point_ballots {
        let map_point = ballot.map_point.trim().to_lowercase();
        if map_point.is_empty() {
            return Err(invalid(&ballot.map_point, "empty map point id"));
        }
        let state = ballot
            .state
            .as_deref()
            .map(validate_state)
            .transpose()
            .map_err(|e| invalid(&map_point, &e.to_string()))?;
        let shortcut = ballot
            .shortcut
            .as_deref()
            .map(validate_shortcut)
            .transpose()
            .map_err(|e| invalid(&map_point, &e.to_string()))?;

        let election = elections.get(&ballot.election_id);
        let fields = BallotLocationFields {
            election_description: election.map(|e| e.name.clone()),
            election_date: election.and_then(|e| e.date_text()),
            text_for_map_search: Some(ballot.text_for_map_search.trim().to_string()),
            normalized_line1: ballot.line1.clone(),
            normalized_line2: ballot.line2.clone(),
            normalized_city: ballot.city.clone(),
            normalized_state: state.clone(),
            normalized_zip: ballot.zip.clone(),
            state_code: state,
            latitude: ballot.latitude,
            longitude: ballot.longitude,
            display_option_on: Some(ballot.display_option_on),
            display_name: ballot.display_name.clone(),
            shortcut,
            display_order: ballot.display_order,
        };
        let key = LocationKey::MapPoint(map_point.clone());
        let (_, created) = db.get_or_create_ballot_location(&key, ballot.election_id, &fields)?;
        if created {
            summary.locations_created += 1;
        } else {
            summary.locations_updated += 1;
        }

        for item in &ballot.items {
            let (subject, mut entry) = item_fields(db, &map_point, item)?;
            if item.local_ballot_order.is_some() {
                entry.local_ballot_order = item.local_ballot_order;
            }
            db.upsert_ballot_item(&key, ballot.election_id, &subject, &entry)?;
            summary.items += 1;
        }
    }

    Ok(summary)
}

fn item_fields(
    db: &Db,
    map_point: &str,
    item: &ImportItem,
) -> Result<(BallotSubject, BallotEntryFields), ImportError> {
    match (&item.office, &item.measure) {
        (Some(office_id), None) => {
            let office = db.get_office(office_id)?.ok_or_else(|| ImportError::UnknownReference {
                map_point: map_point.to_string(),
                kind: "office",
                we_vote_id: office_id.clone(),
            })?;
            Ok((
                BallotSubject::Office(office_id.clone()),
                BallotEntryFields::from_office(&office),
            ))
        }
        (None, Some(measure_id)) => {
            let measure = db.get_measure(measure_id)?.ok_or_else(|| ImportError::UnknownReference {
                map_point: map_point.to_string(),
                kind: "measure",
                we_vote_id: measure_id.clone(),
            })?;
            Ok((
                BallotSubject::Measure(measure_id.clone()),
                BallotEntryFields::from_measure(&measure),
            ))
        }
        _ => Err(invalid(map_point, "each item needs exactly one of office or measure")),
    }
}

fn invalid(map_point: &str, reason: &str) -> ImportError {
    ImportError::InvalidBallot {
        map_point: map_point.to_string(),
        reason: reason.to_string(),
    }
}
