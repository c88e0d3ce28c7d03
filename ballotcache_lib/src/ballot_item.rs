//! Ballot item store: the offices and measures on a resolved ballot, with
//! display text copied from the master records.

use std::fmt;

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ballot_location::{BallotRef, LocationKey, MAX_UPSERT_ATTEMPTS};
use crate::db::{collect_rows, is_busy, now_timestamp, Db, DbError};
use crate::error::BallotError;
use crate::master::{ContestMeasure, ContestOffice};

/// What a ballot item is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "we_vote_id", rename_all = "snake_case")]
pub enum BallotSubject {
    Office(String),
    Measure(String),
}

impl BallotSubject {
    pub fn office_id(&self) -> Option<&str> {
        match self {
            BallotSubject::Office(id) => Some(id.as_str()),
            BallotSubject::Measure(_) => None,
        }
    }

    pub fn measure_id(&self) -> Option<&str> {
        match self {
            BallotSubject::Office(_) => None,
            BallotSubject::Measure(id) => Some(id.as_str()),
        }
    }

    pub fn we_vote_id(&self) -> &str {
        match self {
            BallotSubject::Office(id) | BallotSubject::Measure(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BallotSubject::Office(_) => "office",
            BallotSubject::Measure(_) => "measure",
        }
    }

    pub(crate) fn from_columns(
        office: Option<String>,
        measure: Option<String>,
    ) -> Option<BallotSubject> {
        match (office, measure) {
            (Some(o), None) => Some(BallotSubject::Office(o)),
            (None, Some(m)) => Some(BallotSubject::Measure(m)),
            _ => None,
        }
    }
}

impl fmt::Display for BallotSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.we_vote_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BallotEntry {
    pub id: i64,
    pub key: LocationKey,
    pub election_id: i64,
    pub subject: BallotSubject,
    pub display_name: String,
    /// Order from the authoritative ballot source.
    pub google_ballot_placement: Option<i64>,
    pub local_ballot_order: Option<i64>,
    pub measure_subtitle: Option<String>,
    pub measure_text: Option<String>,
    pub measure_url: Option<String>,
    pub yes_vote_description: Option<String>,
    pub no_vote_description: Option<String>,
    pub state_code: Option<String>,
    pub date_last_updated: String,
}

/// Values written by an item upsert; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BallotEntryFields {
    pub display_name: Option<String>,
    pub google_ballot_placement: Option<i64>,
    pub local_ballot_order: Option<i64>,
    pub measure_subtitle: Option<String>,
    pub measure_text: Option<String>,
    pub measure_url: Option<String>,
    pub yes_vote_description: Option<String>,
    pub no_vote_description: Option<String>,
    pub state_code: Option<String>,
}

impl BallotEntryFields {
    pub fn from_office(office: &ContestOffice) -> Self {
        Self {
            display_name: Some(office.office_name.clone()),
            google_ballot_placement: office.ballot_order,
            state_code: office.state_code.clone(),
            ..Default::default()
        }
    }

    pub fn from_measure(measure: &ContestMeasure) -> Self {
        Self {
            display_name: Some(measure.measure_title.clone()),
            google_ballot_placement: measure.ballot_order,
            measure_subtitle: measure.measure_subtitle.clone(),
            measure_text: measure.measure_text.clone(),
            measure_url: measure.measure_url.clone(),
            yes_vote_description: measure.yes_vote_description.clone(),
            no_vote_description: measure.no_vote_description.clone(),
            state_code: measure.state_code.clone(),
            ..Default::default()
        }
    }
}

const ITEM_COLUMNS: &str = "id, voter_id, polling_location_we_vote_id, election_id,
    contest_office_we_vote_id, contest_measure_we_vote_id, ballot_item_display_name,
    google_ballot_placement, local_ballot_order, measure_subtitle, measure_text, measure_url,
    yes_vote_description, no_vote_description, state_code, date_last_updated";

const OWNER_MATCH: &str = "voter_id IS ?1 AND polling_location_we_vote_id IS ?2 AND election_id = ?3";

const ITEM_MATCH: &str = "voter_id IS ?1 AND polling_location_we_vote_id IS ?2 AND election_id = ?3
    AND contest_office_we_vote_id IS ?4 AND contest_measure_we_vote_id IS ?5";

/// Local order first, then source order, then id; unset orders sort last.
const ITEM_ORDER: &str = "local_ballot_order IS NULL, local_ballot_order,
    google_ballot_placement IS NULL, google_ballot_placement, id";

fn entry_from_row(row: &Row) -> rusqlite::Result<BallotEntry> {
    let key = LocationKey::from_columns(row.get(1)?, row.get(2)?).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            1,
            "voter_id/polling_location_we_vote_id".to_string(),
            rusqlite::types::Type::Null,
        )
    })?;
    let subject = BallotSubject::from_columns(row.get(4)?, row.get(5)?).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            4,
            "contest_office_we_vote_id/contest_measure_we_vote_id".to_string(),
            rusqlite::types::Type::Null,
        )
    })?;
    Ok(BallotEntry {
        id: row.get(0)?,
        key,
        election_id: row.get(3)?,
        subject,
        display_name: row.get(6)?,
        google_ballot_placement: row.get(7)?,
        local_ballot_order: row.get(8)?,
        measure_subtitle: row.get(9)?,
        measure_text: row.get(10)?,
        measure_url: row.get(11)?,
        yes_vote_description: row.get(12)?,
        no_vote_description: row.get(13)?,
        state_code: row.get(14)?,
        date_last_updated: row.get(15)?,
    })
}

impl Db {
    /// Creates or updates the item for `(key, election, subject)`, healing a
    /// duplicated triple the same way ballot locations are healed.
    pub fn upsert_ballot_item(
        &self,
        key: &LocationKey,
        election_id: i64,
        subject: &BallotSubject,
        fields: &BallotEntryFields,
    ) -> Result<(BallotEntry, bool), DbError> {
        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let outcome = self
                .write_ballot_item(key, election_id, subject, fields)
                .and_then(|written| {
                    if written.is_none() {
                        let removed = self.remove_duplicate_ballot_items(key, election_id, subject)?;
                        debug!(
                            "Healed {} duplicate ballot items for {} on {} election {} (attempt {}/{})",
                            removed, subject, key, election_id, attempt, MAX_UPSERT_ATTEMPTS
                        );
                    }
                    Ok(written)
                });

            match outcome {
                Ok(Some((id, created))) => {
                    let sql = format!("SELECT {} FROM ballot_items WHERE id = ?1", ITEM_COLUMNS);
                    let entry = self.conn().query_row(&sql, params![id], entry_from_row)?;
                    return Ok((entry, created));
                }
                Ok(None) => {}
                Err(e) if is_busy(&e) && attempt < MAX_UPSERT_ATTEMPTS => {
                    debug!(
                        "Store busy writing {} on {} election {} (attempt {}/{})",
                        subject, key, election_id, attempt, MAX_UPSERT_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DbError::DuplicateRows {
            table: "ballot_items",
            key: format!("{} on {} election {}", subject, key, election_id),
        })
    }

    /// One write under the write lock; `None` when the triple is duplicated.
    fn write_ballot_item(
        &self,
        key: &LocationKey,
        election_id: i64,
        subject: &BallotSubject,
        fields: &BallotEntryFields,
    ) -> Result<Option<(i64, bool)>, DbError> {
        let tx = self.write_tx()?;
        let ids: Vec<i64> = {
            let sql = format!("SELECT id FROM ballot_items WHERE {} ORDER BY id LIMIT 2", ITEM_MATCH);
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    key.voter_id(),
                    key.map_point(),
                    election_id,
                    subject.office_id(),
                    subject.measure_id()
                ],
                |row| row.get(0),
            )?;
            collect_rows(rows)?
        };
        let state_code = fields.state_code.as_ref().map(|s| s.trim().to_uppercase());

        let (id, created) = match ids.as_slice() {
            [] => {
                tx.execute(
                    "INSERT INTO ballot_items (voter_id, polling_location_we_vote_id, election_id,
                        contest_office_we_vote_id, contest_measure_we_vote_id, ballot_item_display_name,
                        google_ballot_placement, local_ballot_order, measure_subtitle, measure_text,
                        measure_url, yes_vote_description, no_vote_description, state_code,
                        date_last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    params![
                        key.voter_id(),
                        key.map_point(),
                        election_id,
                        subject.office_id(),
                        subject.measure_id(),
                        fields.display_name.as_deref().unwrap_or(""),
                        fields.google_ballot_placement,
                        fields.local_ballot_order,
                        fields.measure_subtitle,
                        fields.measure_text,
                        fields.measure_url,
                        fields.yes_vote_description,
                        fields.no_vote_description,
                        state_code,
                        now_timestamp(),
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
            [id] => {
                tx.execute(
                    "UPDATE ballot_items SET
                        ballot_item_display_name = COALESCE(?1, ballot_item_display_name),
                        google_ballot_placement = COALESCE(?2, google_ballot_placement),
                        local_ballot_order = COALESCE(?3, local_ballot_order),
                        measure_subtitle = COALESCE(?4, measure_subtitle),
                        measure_text = COALESCE(?5, measure_text),
                        measure_url = COALESCE(?6, measure_url),
                        yes_vote_description = COALESCE(?7, yes_vote_description),
                        no_vote_description = COALESCE(?8, no_vote_description),
                        state_code = COALESCE(?9, state_code),
                        date_last_updated = ?10
                     WHERE id = ?11",
                    params![
                        fields.display_name,
                        fields.google_ballot_placement,
                        fields.local_ballot_order,
                        fields.measure_subtitle,
                        fields.measure_text,
                        fields.measure_url,
                        fields.yes_vote_description,
                        fields.no_vote_description,
                        state_code,
                        now_timestamp(),
                        id,
                    ],
                )?;
                (*id, false)
            }
            _ => return Ok(None),
        };
        tx.commit()?;
        Ok(Some((id, created)))
    }

    /// Keeps the earliest item for the triple and deletes the rest.
    pub fn remove_duplicate_ballot_items(
        &self,
        key: &LocationKey,
        election_id: i64,
        subject: &BallotSubject,
    ) -> Result<usize, DbError> {
        let sql = format!(
            "DELETE FROM ballot_items WHERE {m} AND id > (SELECT MIN(id) FROM ballot_items WHERE {m})",
            m = ITEM_MATCH
        );
        let removed = self.conn().execute(
            &sql,
            params![
                key.voter_id(),
                key.map_point(),
                election_id,
                subject.office_id(),
                subject.measure_id()
            ],
        )?;
        if removed > 0 {
            info!(
                "Removed {} duplicate ballot items for {} on {} election {}",
                removed, subject, key, election_id
            );
        }
        Ok(removed)
    }

    /// Pushes an office's current name and order into every item that
    /// references it. One UPDATE; returns the number of rows touched.
    pub fn refresh_all_for_office(&self, office: &ContestOffice) -> Result<usize, DbError> {
        let updated = self.conn().execute(
            "UPDATE ballot_items SET
                ballot_item_display_name = ?1,
                google_ballot_placement = COALESCE(?2, google_ballot_placement),
                date_last_updated = ?3
             WHERE contest_office_we_vote_id = ?4",
            params![
                office.office_name,
                office.ballot_order,
                now_timestamp(),
                office.we_vote_id
            ],
        )?;
        Ok(updated)
    }

    /// Measure counterpart of [`Db::refresh_all_for_office`]; also copies the
    /// subtitle, full text, link and yes/no descriptions.
    pub fn refresh_all_for_measure(&self, measure: &ContestMeasure) -> Result<usize, DbError> {
        let updated = self.conn().execute(
            "UPDATE ballot_items SET
                ballot_item_display_name = ?1,
                google_ballot_placement = COALESCE(?2, google_ballot_placement),
                measure_subtitle = ?3,
                measure_text = ?4,
                measure_url = ?5,
                yes_vote_description = ?6,
                no_vote_description = ?7,
                date_last_updated = ?8
             WHERE contest_measure_we_vote_id = ?9",
            params![
                measure.measure_title,
                measure.ballot_order,
                measure.measure_subtitle,
                measure.measure_text,
                measure.measure_url,
                measure.yes_vote_description,
                measure.no_vote_description,
                now_timestamp(),
                measure.we_vote_id
            ],
        )?;
        Ok(updated)
    }

    pub fn ballot_items_for_location(
        &self,
        key: &LocationKey,
        election_id: i64,
    ) -> Result<Vec<BallotEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM ballot_items WHERE {} ORDER BY {}",
            ITEM_COLUMNS, OWNER_MATCH, ITEM_ORDER
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![key.voter_id(), key.map_point(), election_id],
            entry_from_row,
        )?;
        collect_rows(rows)
    }

    /// Items of the ballot named by a permanent id or shortcut, in ballot order.
    pub fn get_ballot_items(&self, ballot_ref: &BallotRef) -> Result<Vec<BallotEntry>, BallotError> {
        let location = self
            .get_ballot_location_by_ref(ballot_ref)?
            .ok_or_else(|| BallotError::BallotNotFound(ballot_ref.to_string()))?;
        Ok(self.ballot_items_for_location(&location.key, location.election_id)?)
    }

    pub fn count_ballot_items(&self, key: &LocationKey, election_id: i64) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM ballot_items WHERE {}", OWNER_MATCH);
        let count = self.conn().query_row(
            &sql,
            params![key.voter_id(), key.map_point(), election_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Clears a ballot's items ahead of re-assembly.
    pub fn delete_ballot_items(&self, key: &LocationKey, election_id: i64) -> Result<usize, DbError> {
        let sql = format!("DELETE FROM ballot_items WHERE {}", OWNER_MATCH);
        let removed = self
            .conn()
            .execute(&sql, params![key.voter_id(), key.map_point(), election_id])?;
        Ok(removed)
    }

    /// Replaces the items under `to` with a copy of the items under `from`
    /// for the same election. Duplicated source triples are copied once.
    pub fn copy_ballot_items(
        &self,
        from: &LocationKey,
        to: &LocationKey,
        election_id: i64,
    ) -> Result<usize, DbError> {
        if from == to {
            return Ok(0);
        }
        let tx = self.write_tx()?;
        tx.execute(
            &format!("DELETE FROM ballot_items WHERE {}", OWNER_MATCH),
            params![to.voter_id(), to.map_point(), election_id],
        )?;
        let copied = tx.execute(
            "INSERT INTO ballot_items (voter_id, polling_location_we_vote_id, election_id,
                contest_office_we_vote_id, contest_measure_we_vote_id, ballot_item_display_name,
                google_ballot_placement, local_ballot_order, measure_subtitle, measure_text,
                measure_url, yes_vote_description, no_vote_description, state_code, date_last_updated)
             SELECT ?1, ?2, election_id, contest_office_we_vote_id, contest_measure_we_vote_id,
                ballot_item_display_name, google_ballot_placement, local_ballot_order,
                measure_subtitle, measure_text, measure_url, yes_vote_description,
                no_vote_description, state_code, ?6
             FROM ballot_items
             WHERE id IN (
                SELECT MIN(id) FROM ballot_items
                WHERE voter_id IS ?3 AND polling_location_we_vote_id IS ?4 AND election_id = ?5
                GROUP BY contest_office_we_vote_id, contest_measure_we_vote_id
             )
             ORDER BY id",
            params![
                to.voter_id(),
                to.map_point(),
                from.voter_id(),
                from.map_point(),
                election_id,
                now_timestamp()
            ],
        )?;
        tx.commit()?;
        debug!("Copied {} ballot items from {} to {} for election {}", copied, from, to, election_id);
        Ok(copied)
    }

    /// Every `(key, election, subject)` with more than one item row.
    pub fn duplicate_item_keys(
        &self,
        election_id: Option<i64>,
    ) -> Result<Vec<(LocationKey, i64, BallotSubject)>, DbError> {
        let mut stmt = self.conn().prepare(
            "SELECT voter_id, polling_location_we_vote_id, election_id,
                    contest_office_we_vote_id, contest_measure_we_vote_id
             FROM ballot_items
             WHERE (?1 IS NULL OR election_id = ?1)
             GROUP BY voter_id, polling_location_we_vote_id, election_id,
                      contest_office_we_vote_id, contest_measure_we_vote_id
             HAVING COUNT(*) > 1
             ORDER BY election_id, MIN(id)",
        )?;
        let rows = stmt.query_map(params![election_id], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        Ok(collect_rows(rows)?
            .into_iter()
            .filter_map(|(voter, map_point, election, office, measure)| {
                let key = LocationKey::from_columns(voter, map_point)?;
                let subject = BallotSubject::from_columns(office, measure)?;
                Some((key, election, subject))
            })
            .collect())
    }

    /// Distinct offices and measures referenced by an election's items.
    pub fn distinct_subjects_for_election(
        &self,
        election_id: i64,
    ) -> Result<Vec<BallotSubject>, DbError> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT contest_office_we_vote_id, contest_measure_we_vote_id
             FROM ballot_items WHERE election_id = ?1
             ORDER BY contest_office_we_vote_id, contest_measure_we_vote_id",
        )?;
        let rows = stmt.query_map(params![election_id], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        Ok(collect_rows(rows)?
            .into_iter()
            .filter_map(|(office, measure)| BallotSubject::from_columns(office, measure))
            .collect())
    }
}
