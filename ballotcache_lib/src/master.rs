//! Summaries of the authoritative office and measure records.
//!
//! Ballot items copy their display text from these. The engine never edits
//! them; the import job loads them and [`crate::refresher::CacheRefresher`]
//! reads them back when pushing changes into the item cache.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{now_timestamp, Db, DbError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestOffice {
    pub we_vote_id: String,
    pub office_name: String,
    #[serde(default)]
    pub ballot_order: Option<i64>,
    #[serde(default)]
    pub election_id: Option<i64>,
    #[serde(default)]
    pub state_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestMeasure {
    pub we_vote_id: String,
    pub measure_title: String,
    #[serde(default)]
    pub ballot_order: Option<i64>,
    #[serde(default)]
    pub measure_subtitle: Option<String>,
    #[serde(default)]
    pub measure_text: Option<String>,
    #[serde(default)]
    pub measure_url: Option<String>,
    #[serde(default)]
    pub yes_vote_description: Option<String>,
    #[serde(default)]
    pub no_vote_description: Option<String>,
    #[serde(default)]
    pub election_id: Option<i64>,
    #[serde(default)]
    pub state_code: Option<String>,
}

/// Read access to master office/measure records.
pub trait MasterRecordProvider {
    fn get_office(&self, we_vote_id: &str) -> Result<Option<ContestOffice>, DbError>;
    fn get_measure(&self, we_vote_id: &str) -> Result<Option<ContestMeasure>, DbError>;
}

impl MasterRecordProvider for Db {
    fn get_office(&self, we_vote_id: &str) -> Result<Option<ContestOffice>, DbError> {
        self.conn()
            .query_row(
                "SELECT we_vote_id, office_name, ballot_order, election_id, state_code
                 FROM contest_offices WHERE we_vote_id = ?1",
                params![we_vote_id],
                |row| {
                    Ok(ContestOffice {
                        we_vote_id: row.get(0)?,
                        office_name: row.get(1)?,
                        ballot_order: row.get(2)?,
                        election_id: row.get(3)?,
                        state_code: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(DbError::from)
    }

    fn get_measure(&self, we_vote_id: &str) -> Result<Option<ContestMeasure>, DbError> {
        self.conn()
            .query_row(
                "SELECT we_vote_id, measure_title, ballot_order, measure_subtitle, measure_text,
                        measure_url, yes_vote_description, no_vote_description, election_id, state_code
                 FROM contest_measures WHERE we_vote_id = ?1",
                params![we_vote_id],
                |row| {
                    Ok(ContestMeasure {
                        we_vote_id: row.get(0)?,
                        measure_title: row.get(1)?,
                        ballot_order: row.get(2)?,
                        measure_subtitle: row.get(3)?,
                        measure_text: row.get(4)?,
                        measure_url: row.get(5)?,
                        yes_vote_description: row.get(6)?,
                        no_vote_description: row.get(7)?,
                        election_id: row.get(8)?,
                        state_code: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(DbError::from)
    }
}

impl Db {
    pub fn upsert_office(&self, office: &ContestOffice) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO contest_offices (we_vote_id, election_id, office_name, ballot_order, state_code, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(we_vote_id) DO UPDATE SET
                election_id = excluded.election_id,
                office_name = excluded.office_name,
                ballot_order = excluded.ballot_order,
                state_code = excluded.state_code,
                last_updated = excluded.last_updated",
            params![
                office.we_vote_id,
                office.election_id,
                office.office_name,
                office.ballot_order,
                office.state_code.as_ref().map(|s| s.to_uppercase()),
                now_timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_measure(&self, measure: &ContestMeasure) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO contest_measures (we_vote_id, election_id, measure_title, ballot_order,
                measure_subtitle, measure_text, measure_url, yes_vote_description, no_vote_description,
                state_code, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(we_vote_id) DO UPDATE SET
                election_id = excluded.election_id,
                measure_title = excluded.measure_title,
                ballot_order = excluded.ballot_order,
                measure_subtitle = excluded.measure_subtitle,
                measure_text = excluded.measure_text,
                measure_url = excluded.measure_url,
                yes_vote_description = excluded.yes_vote_description,
                no_vote_description = excluded.no_vote_description,
                state_code = excluded.state_code,
                last_updated = excluded.last_updated",
            params![
                measure.we_vote_id,
                measure.election_id,
                measure.measure_title,
                measure.ballot_order,
                measure.measure_subtitle,
                measure.measure_text,
                measure.measure_url,
                measure.yes_vote_description,
                measure.no_vote_description,
                measure.state_code.as_ref().map(|s| s.to_uppercase()),
                now_timestamp(),
            ],
        )?;
        Ok(())
    }
}
