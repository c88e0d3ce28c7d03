//! Per-voter record of which ballot was shown for which election.
//!
//! Rows are upserted on `(voter_id, election_id)` and never duplicated. The
//! city/state/zip breakdowns of the voter's text and of the substituted
//! address may be missing on older rows; [`VoterBallotCache::get`] fills
//! them in on read and writes them back.

use std::sync::{Arc, Mutex};

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{breakdown_from_text, AddressBreakdown};
use crate::db::{collect_rows, now_timestamp, Db, DbError};
use crate::error::BallotError;
use crate::geocoder::{GeocodeOutcome, GeocoderAdapter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoterBallot {
    pub id: i64,
    pub voter_id: i64,
    pub election_id: i64,
    pub state_code: Option<String>,
    pub election_description: Option<String>,
    pub election_date: Option<String>,
    pub original_text_for_map_search: String,
    pub original: AddressBreakdown,
    pub substituted_address_nearby: String,
    pub substituted: AddressBreakdown,
    pub is_from_substituted_address: bool,
    pub is_from_test_ballot: bool,
    pub polling_location_we_vote_id_source: Option<String>,
    pub ballot_location_we_vote_id: Option<String>,
    pub ballot_location_display_name: Option<String>,
    pub ballot_location_shortcut: Option<String>,
    pub date_last_updated: String,
}

impl VoterBallot {
    /// Notice shown next to a ballot that is not an exact match.
    pub fn ballot_caveat(&self) -> String {
        let mut parts = Vec::new();
        if self.is_from_substituted_address {
            parts.push(format!(
                "Ballot displayed is from a nearby address: '{}'.",
                self.substituted_address_nearby
            ));
        }
        if self.is_from_test_ballot {
            parts.push(
                "Ballot displayed is a TEST ballot, and is for demonstration purposes only."
                    .to_string(),
            );
        }
        parts.join(" ")
    }
}

/// Values saved for one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoterBallotRecord {
    pub voter_id: i64,
    pub election_id: i64,
    pub state_code: Option<String>,
    pub election_description: Option<String>,
    pub election_date: Option<String>,
    pub original_text_for_map_search: String,
    pub original: AddressBreakdown,
    pub substituted_address_nearby: String,
    pub substituted: AddressBreakdown,
    pub is_from_substituted_address: bool,
    pub is_from_test_ballot: bool,
    pub polling_location_we_vote_id_source: Option<String>,
    pub ballot_location_we_vote_id: Option<String>,
    pub ballot_location_display_name: Option<String>,
    pub ballot_location_shortcut: Option<String>,
}

/// How a voter's saved ballot is looked up. Everything except `Election`
/// may match several elections; the most recent one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterBallotLookup {
    Election(i64),
    BallotLocation(String),
    Shortcut(String),
    AddressText(String),
}

const VOTER_BALLOT_COLUMNS: &str = "id, voter_id, election_id, state_code, election_description,
    election_date, original_text_for_map_search, original_text_city, original_text_state,
    original_text_zip, substituted_address_nearby, substituted_address_city,
    substituted_address_state, substituted_address_zip, is_from_substituted_address,
    is_from_test_ballot, polling_location_we_vote_id_source, ballot_location_we_vote_id,
    ballot_location_display_name, ballot_location_shortcut, date_last_updated";

const NEWEST_FIRST: &str = "election_date DESC, election_id DESC";

fn voter_ballot_from_row(row: &Row) -> rusqlite::Result<VoterBallot> {
    Ok(VoterBallot {
        id: row.get(0)?,
        voter_id: row.get(1)?,
        election_id: row.get(2)?,
        state_code: row.get(3)?,
        election_description: row.get(4)?,
        election_date: row.get(5)?,
        original_text_for_map_search: row.get(6)?,
        original: AddressBreakdown {
            city: row.get(7)?,
            state: row.get(8)?,
            zip: row.get(9)?,
        },
        substituted_address_nearby: row.get(10)?,
        substituted: AddressBreakdown {
            city: row.get(11)?,
            state: row.get(12)?,
            zip: row.get(13)?,
        },
        is_from_substituted_address: row.get(14)?,
        is_from_test_ballot: row.get(15)?,
        polling_location_we_vote_id_source: row.get(16)?,
        ballot_location_we_vote_id: row.get(17)?,
        ballot_location_display_name: row.get(18)?,
        ballot_location_shortcut: row.get(19)?,
        date_last_updated: row.get(20)?,
    })
}

fn lookup_clause(lookup: &VoterBallotLookup) -> (&'static str, Box<dyn rusqlite::types::ToSql>) {
    match lookup {
        VoterBallotLookup::Election(id) => ("election_id = ?2", Box::new(*id)),
        VoterBallotLookup::BallotLocation(we_vote_id) => (
            "ballot_location_we_vote_id = ?2",
            Box::new(we_vote_id.trim().to_lowercase()),
        ),
        VoterBallotLookup::Shortcut(shortcut) => (
            "ballot_location_shortcut = ?2",
            Box::new(shortcut.trim().to_lowercase()),
        ),
        VoterBallotLookup::AddressText(text) => (
            "LOWER(original_text_for_map_search) = LOWER(?2)",
            Box::new(text.trim().to_string()),
        ),
    }
}

impl Db {
    /// Insert or replace the row for `(voter_id, election_id)`.
    pub fn upsert_voter_ballot(&self, record: &VoterBallotRecord) -> Result<VoterBallot, DbError> {
        let sql = format!(
            "INSERT INTO voter_ballots (voter_id, election_id, state_code, election_description,
                election_date, original_text_for_map_search, original_text_city, original_text_state,
                original_text_zip, substituted_address_nearby, substituted_address_city,
                substituted_address_state, substituted_address_zip, is_from_substituted_address,
                is_from_test_ballot, polling_location_we_vote_id_source, ballot_location_we_vote_id,
                ballot_location_display_name, ballot_location_shortcut, date_last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT(voter_id, election_id) DO UPDATE SET
                state_code = excluded.state_code,
                election_description = excluded.election_description,
                election_date = excluded.election_date,
                original_text_for_map_search = excluded.original_text_for_map_search,
                original_text_city = excluded.original_text_city,
                original_text_state = excluded.original_text_state,
                original_text_zip = excluded.original_text_zip,
                substituted_address_nearby = excluded.substituted_address_nearby,
                substituted_address_city = excluded.substituted_address_city,
                substituted_address_state = excluded.substituted_address_state,
                substituted_address_zip = excluded.substituted_address_zip,
                is_from_substituted_address = excluded.is_from_substituted_address,
                is_from_test_ballot = excluded.is_from_test_ballot,
                polling_location_we_vote_id_source = excluded.polling_location_we_vote_id_source,
                ballot_location_we_vote_id = excluded.ballot_location_we_vote_id,
                ballot_location_display_name = excluded.ballot_location_display_name,
                ballot_location_shortcut = excluded.ballot_location_shortcut,
                date_last_updated = excluded.date_last_updated
             RETURNING {}",
            VOTER_BALLOT_COLUMNS
        );
        let row = self.conn().query_row(
            &sql,
            params![
                record.voter_id,
                record.election_id,
                record.state_code,
                record.election_description,
                record.election_date,
                record.original_text_for_map_search,
                record.original.city,
                record.original.state,
                record.original.zip,
                record.substituted_address_nearby,
                record.substituted.city,
                record.substituted.state,
                record.substituted.zip,
                record.is_from_substituted_address,
                record.is_from_test_ballot,
                record.polling_location_we_vote_id_source,
                record.ballot_location_we_vote_id,
                record.ballot_location_display_name,
                record.ballot_location_shortcut,
                now_timestamp(),
            ],
            voter_ballot_from_row,
        )?;
        Ok(row)
    }

    pub fn get_voter_ballot(
        &self,
        voter_id: i64,
        lookup: &VoterBallotLookup,
    ) -> Result<Option<VoterBallot>, DbError> {
        let (clause, value) = lookup_clause(lookup);
        let sql = format!(
            "SELECT {} FROM voter_ballots WHERE voter_id = ?1 AND {} ORDER BY {} LIMIT 1",
            VOTER_BALLOT_COLUMNS, clause, NEWEST_FIRST
        );
        self.conn()
            .query_row(&sql, params![voter_id, value], voter_ballot_from_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Deletes every row of the voter matching `lookup`.
    pub fn delete_voter_ballot(
        &self,
        voter_id: i64,
        lookup: &VoterBallotLookup,
    ) -> Result<usize, DbError> {
        let (clause, value) = lookup_clause(lookup);
        let sql = format!("DELETE FROM voter_ballots WHERE voter_id = ?1 AND {}", clause);
        Ok(self.conn().execute(&sql, params![voter_id, value])?)
    }

    /// All saved ballots of a voter, newest election first.
    pub fn list_voter_ballots(&self, voter_id: i64) -> Result<Vec<VoterBallot>, DbError> {
        let sql = format!(
            "SELECT {} FROM voter_ballots WHERE voter_id = ?1 ORDER BY {}",
            VOTER_BALLOT_COLUMNS, NEWEST_FIRST
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![voter_id], voter_ballot_from_row)?;
        collect_rows(rows)
    }

    pub fn update_voter_ballot_breakdowns(
        &self,
        id: i64,
        original: &AddressBreakdown,
        substituted: &AddressBreakdown,
    ) -> Result<(), DbError> {
        self.conn().execute(
            "UPDATE voter_ballots SET
                original_text_city = ?1, original_text_state = ?2, original_text_zip = ?3,
                substituted_address_city = ?4, substituted_address_state = ?5,
                substituted_address_zip = ?6
             WHERE id = ?7",
            params![
                original.city,
                original.state,
                original.zip,
                substituted.city,
                substituted.state,
                substituted.zip,
                id
            ],
        )?;
        Ok(())
    }
}

/// Voter ballot access with lazy backfill of address breakdowns.
pub struct VoterBallotCache {
    db: Arc<Mutex<Db>>,
    geocoder: Option<Arc<GeocoderAdapter>>,
}

impl VoterBallotCache {
    /// Without a geocoder, backfill uses text heuristics only.
    pub fn new(db: Arc<Mutex<Db>>, geocoder: Option<Arc<GeocoderAdapter>>) -> Self {
        Self { db, geocoder }
    }

    pub fn save(&self, record: &VoterBallotRecord) -> Result<VoterBallot, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        Ok(db.upsert_voter_ballot(record)?)
    }

    pub async fn get(
        &self,
        voter_id: i64,
        lookup: &VoterBallotLookup,
    ) -> Result<Option<VoterBallot>, BallotError> {
        let found = {
            let db = self.db.lock().expect("db mutex poisoned");
            db.get_voter_ballot(voter_id, lookup)?
        };
        match found {
            Some(row) => Ok(Some(self.backfill(row).await?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, voter_id: i64, lookup: &VoterBallotLookup) -> Result<usize, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        Ok(db.delete_voter_ballot(voter_id, lookup)?)
    }

    pub fn list(&self, voter_id: i64) -> Result<Vec<VoterBallot>, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        Ok(db.list_voter_ballots(voter_id)?)
    }

    async fn backfill(&self, mut row: VoterBallot) -> Result<VoterBallot, BallotError> {
        let original = self
            .complete_breakdown(&row.original_text_for_map_search, row.original.clone())
            .await;
        let substituted = self
            .complete_breakdown(&row.substituted_address_nearby, row.substituted.clone())
            .await;
        if original == row.original && substituted == row.substituted {
            return Ok(row);
        }

        {
            let db = self.db.lock().expect("db mutex poisoned");
            db.update_voter_ballot_breakdowns(row.id, &original, &substituted)?;
        }
        debug!(
            "Backfilled address breakdowns for voter {} election {}",
            row.voter_id, row.election_id
        );
        row.original = original;
        row.substituted = substituted;
        Ok(row)
    }

    /// Heuristics first; the geocoder only when city or state is still unknown.
    async fn complete_breakdown(&self, text: &str, current: AddressBreakdown) -> AddressBreakdown {
        if text.trim().is_empty() || current.is_complete() {
            return current;
        }
        let merged = current.or(breakdown_from_text(text));
        if merged.city.is_some() && merged.state.is_some() {
            return merged;
        }
        match &self.geocoder {
            Some(geocoder) => match geocoder.locate(text).await {
                GeocodeOutcome::Found(address) => merged.or(AddressBreakdown::from(&address)),
                GeocodeOutcome::NotFound | GeocodeOutcome::QuotaExceeded => merged,
            },
            None => merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_db() -> Db {
        let db = Db::open_in_memory().expect("open in-memory db");
        db.init().expect("init schema");
        db
    }

    fn record(voter_id: i64, election_id: i64, date: &str, text: &str) -> VoterBallotRecord {
        VoterBallotRecord {
            voter_id,
            election_id,
            election_date: Some(date.to_string()),
            original_text_for_map_search: text.to_string(),
            ballot_location_we_vote_id: Some(format!("wv01ballot{}", election_id)),
            ballot_location_shortcut: Some(format!("ballot-{}", election_id)),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_supersedes() {
        let db = open_test_db();
        let first = db.upsert_voter_ballot(&record(1, 10, "2024-11-05", "Jackson, MS")).unwrap();
        let mut changed = record(1, 10, "2024-11-05", "Coldwater, MS");
        changed.is_from_substituted_address = true;
        changed.substituted_address_nearby = "Coldwater, MS 38618".to_string();
        let second = db.upsert_voter_ballot(&changed).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.original_text_for_map_search, "Coldwater, MS");
        assert_eq!(db.list_voter_ballots(1).unwrap().len(), 1);
        assert_eq!(
            second.ballot_caveat(),
            "Ballot displayed is from a nearby address: 'Coldwater, MS 38618'."
        );
    }

    #[test]
    fn test_caveat_for_exact_and_test_ballots() {
        let db = open_test_db();
        let exact = db.upsert_voter_ballot(&record(1, 10, "2024-11-05", "x")).unwrap();
        assert_eq!(exact.ballot_caveat(), "");

        let mut demo = record(1, 11, "2024-11-05", "x");
        demo.is_from_test_ballot = true;
        let demo = db.upsert_voter_ballot(&demo).unwrap();
        assert!(demo.ballot_caveat().contains("TEST ballot"));
    }

    #[test]
    fn test_lookups_prefer_newest_election() {
        let db = open_test_db();
        db.upsert_voter_ballot(&record(1, 10, "2023-11-07", "Jackson, MS")).unwrap();
        db.upsert_voter_ballot(&record(1, 11, "2024-11-05", "jackson, ms")).unwrap();
        db.upsert_voter_ballot(&record(2, 12, "2025-01-01", "Jackson, MS")).unwrap();

        let by_text = db
            .get_voter_ballot(1, &VoterBallotLookup::AddressText(" JACKSON, MS ".into()))
            .unwrap()
            .unwrap();
        assert_eq!(by_text.election_id, 11);

        let by_election = db
            .get_voter_ballot(1, &VoterBallotLookup::Election(10))
            .unwrap()
            .unwrap();
        assert_eq!(by_election.election_id, 10);

        let by_location = db
            .get_voter_ballot(1, &VoterBallotLookup::BallotLocation("WV01BALLOT10".into()))
            .unwrap()
            .unwrap();
        assert_eq!(by_location.election_id, 10);

        let by_shortcut = db
            .get_voter_ballot(1, &VoterBallotLookup::Shortcut("ballot-11".into()))
            .unwrap()
            .unwrap();
        assert_eq!(by_shortcut.election_id, 11);

        let listed: Vec<i64> = db
            .list_voter_ballots(1)
            .unwrap()
            .iter()
            .map(|v| v.election_id)
            .collect();
        assert_eq!(listed, vec![11, 10]);

        assert_eq!(db.delete_voter_ballot(1, &VoterBallotLookup::Election(10)).unwrap(), 1);
        assert!(db.get_voter_ballot(1, &VoterBallotLookup::Election(10)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_backfills_breakdowns_from_text() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let cache = VoterBallotCache::new(Arc::clone(&db), None);

        let mut rec = record(3, 10, "2024-11-05", "1200 Broadway, Oakland, CA 94612");
        rec.substituted_address_nearby = "Sunnyvale, CA".to_string();
        rec.is_from_substituted_address = true;
        cache.save(&rec).unwrap();

        let got = cache
            .get(3, &VoterBallotLookup::Election(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.original.city.as_deref(), Some("oakland"));
        assert_eq!(got.original.state.as_deref(), Some("CA"));
        assert_eq!(got.original.zip.as_deref(), Some("94612"));
        assert_eq!(got.substituted.city.as_deref(), Some("sunnyvale"));

        // persisted, not just returned
        let stored = db
            .lock()
            .unwrap()
            .get_voter_ballot(3, &VoterBallotLookup::Election(10))
            .unwrap()
            .unwrap();
        assert_eq!(stored.original, got.original);
        assert_eq!(stored.substituted, got.substituted);
    }

    #[tokio::test]
    async fn test_get_missing_and_delete() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let cache = VoterBallotCache::new(db, None);
        assert!(cache
            .get(9, &VoterBallotLookup::Election(1))
            .await
            .unwrap()
            .is_none());
        cache.save(&record(9, 1, "2024-01-01", "")).unwrap();
        assert_eq!(cache.list(9).unwrap().len(), 1);
        assert_eq!(cache.delete(9, &VoterBallotLookup::Election(1)).unwrap(), 1);
        assert!(cache.list(9).unwrap().is_empty());
    }
}
