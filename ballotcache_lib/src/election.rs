//! Election catalog: read-only election summaries and the date-based
//! scoping used when a voter does not name an election.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{collect_rows, now_timestamp, Db, DbError};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    pub election_id: i64,
    pub name: String,
    pub election_date: Option<NaiveDate>,
    /// `None` for national elections, which apply to every state.
    pub state_code: Option<String>,
    /// Demonstration elections; never picked by date-based scoping.
    #[serde(default)]
    pub is_test: bool,
}

impl Election {
    pub fn is_national(&self) -> bool {
        self.state_code.is_none()
    }

    pub fn applies_to_state(&self, state_code: &str) -> bool {
        match &self.state_code {
            Some(s) => s.eq_ignore_ascii_case(state_code),
            None => true,
        }
    }

    pub fn date_text(&self) -> Option<String> {
        self.election_date.map(|d| d.format(DATE_FORMAT).to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateDirection {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

/// Source of election summaries.
pub trait ElectionCatalog {
    fn get_election(&self, election_id: i64) -> Result<Option<Election>, DbError>;

    /// Elections with a date, ordered by date in `direction`. Elections on
    /// the same date always order by id ascending.
    fn list_elections_by_date(
        &self,
        direction: DateDirection,
        include_test: bool,
    ) -> Result<Vec<Election>, DbError>;
}

type ElectionRow = (i64, String, Option<String>, Option<String>, bool);

fn election_from_parts(row: ElectionRow) -> Result<Election, DbError> {
    let (election_id, name, date, state_code, is_test) = row;
    let election_date = match date.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => Some(NaiveDate::parse_from_str(d, DATE_FORMAT)?),
        _ => None,
    };
    Ok(Election {
        election_id,
        name,
        election_date,
        state_code: state_code.filter(|s| !s.trim().is_empty()),
        is_test,
    })
}

impl ElectionCatalog for Db {
    fn get_election(&self, election_id: i64) -> Result<Option<Election>, DbError> {
        let row: Option<ElectionRow> = self
            .conn()
            .query_row(
                "SELECT election_id, election_name, election_date, state_code, is_test
                 FROM elections WHERE election_id = ?1",
                params![election_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        row.map(election_from_parts).transpose()
    }

    fn list_elections_by_date(
        &self,
        direction: DateDirection,
        include_test: bool,
    ) -> Result<Vec<Election>, DbError> {
        let order = match direction {
            DateDirection::Ascending => "ASC",
            DateDirection::Descending => "DESC",
        };
        let sql = format!(
            "SELECT election_id, election_name, election_date, state_code, is_test
             FROM elections
             WHERE election_date IS NOT NULL AND election_date != ''
               AND (?1 OR is_test = 0)
             ORDER BY election_date {}, election_id ASC",
            order
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![include_test], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?;
        collect_rows(rows)?
            .into_iter()
            .map(election_from_parts)
            .collect()
    }
}

impl Db {
    pub fn upsert_election(&self, election: &Election) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO elections (election_id, election_name, election_date, state_code, is_test, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(election_id) DO UPDATE SET
                election_name = excluded.election_name,
                election_date = excluded.election_date,
                state_code = excluded.state_code,
                is_test = excluded.is_test,
                last_updated = excluded.last_updated",
            params![
                election.election_id,
                election.name,
                election.date_text(),
                election.state_code.as_ref().map(|s| s.to_uppercase()),
                election.is_test,
                now_timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Elections on or after `today` that apply to `state_code` (directly
    /// or nationally) and have at least one map-point ballot in that state,
    /// soonest first. With no state, any election with map-point ballots
    /// qualifies.
    pub fn upcoming_elections_with_ballots(
        &self,
        state_code: Option<&str>,
        today: NaiveDate,
    ) -> Result<Vec<Election>, DbError> {
        let mut result = Vec::new();
        for election in self.list_elections_by_date(DateDirection::Ascending, false)? {
            if election.election_date.is_some_and(|d| d >= today)
                && self.election_qualifies(&election, state_code)?
            {
                result.push(election);
            }
        }
        Ok(result)
    }

    /// Most recent election before `today` that qualifies the same way as
    /// [`Db::upcoming_elections_with_ballots`].
    pub fn last_election_with_ballots(
        &self,
        state_code: Option<&str>,
        today: NaiveDate,
    ) -> Result<Option<Election>, DbError> {
        for election in self.list_elections_by_date(DateDirection::Descending, false)? {
            if election.election_date.is_some_and(|d| d < today)
                && self.election_qualifies(&election, state_code)?
            {
                return Ok(Some(election));
            }
        }
        Ok(None)
    }

    fn election_qualifies(
        &self,
        election: &Election,
        state_code: Option<&str>,
    ) -> Result<bool, DbError> {
        if let Some(state) = state_code {
            if !election.applies_to_state(state) {
                return Ok(false);
            }
        }
        Ok(self.count_map_point_ballots(election.election_id, state_code)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot_location::{BallotLocationFields, LocationKey};

    fn open_test_db() -> Db {
        let db = Db::open_in_memory().expect("open in-memory db");
        db.init().expect("init schema");
        db
    }

    fn date(s: &str) -> Option<NaiveDate> {
        Some(NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap())
    }

    fn election(id: i64, d: &str, state: Option<&str>) -> Election {
        Election {
            election_id: id,
            name: format!("Election {}", id),
            election_date: date(d),
            state_code: state.map(String::from),
            is_test: false,
        }
    }

    fn add_map_point(db: &Db, map_point: &str, election_id: i64, state: &str) {
        let fields = BallotLocationFields {
            state_code: Some(state.to_string()),
            ..Default::default()
        };
        db.get_or_create_ballot_location(
            &LocationKey::MapPoint(map_point.to_string()),
            election_id,
            &fields,
        )
        .expect("create map point ballot");
    }

    #[test]
    fn test_upsert_and_get() {
        let db = open_test_db();
        db.upsert_election(&election(4184, "2024-11-05", Some("ms"))).unwrap();
        let got = db.get_election(4184).unwrap().unwrap();
        assert_eq!(got.state_code.as_deref(), Some("MS"));
        assert_eq!(got.date_text().as_deref(), Some("2024-11-05"));

        let mut renamed = election(4184, "2024-11-06", None);
        renamed.name = "General".to_string();
        db.upsert_election(&renamed).unwrap();
        let got = db.get_election(4184).unwrap().unwrap();
        assert_eq!(got.name, "General");
        assert!(got.is_national());
        assert!(db.get_election(1).unwrap().is_none());
    }

    #[test]
    fn test_list_by_date_orders_and_excludes_test() {
        let db = open_test_db();
        db.upsert_election(&election(3, "2024-03-01", None)).unwrap();
        db.upsert_election(&election(2, "2024-03-01", None)).unwrap();
        db.upsert_election(&election(1, "2023-01-01", None)).unwrap();
        let mut demo = election(2000, "2024-06-01", None);
        demo.is_test = true;
        db.upsert_election(&demo).unwrap();

        let asc: Vec<i64> = db
            .list_elections_by_date(DateDirection::Ascending, false)
            .unwrap()
            .iter()
            .map(|e| e.election_id)
            .collect();
        assert_eq!(asc, vec![1, 2, 3]);

        let desc: Vec<i64> = db
            .list_elections_by_date(DateDirection::Descending, true)
            .unwrap()
            .iter()
            .map(|e| e.election_id)
            .collect();
        assert_eq!(desc, vec![2000, 2, 3, 1]);
    }

    #[test]
    fn test_upcoming_requires_ballots_in_state() {
        let db = open_test_db();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        db.upsert_election(&election(10, "2024-08-01", Some("MS"))).unwrap();
        db.upsert_election(&election(11, "2024-07-01", None)).unwrap();
        db.upsert_election(&election(12, "2024-07-15", Some("CA"))).unwrap();
        db.upsert_election(&election(13, "2024-09-01", Some("MS"))).unwrap();

        add_map_point(&db, "wv01ploc1", 10, "MS");
        add_map_point(&db, "wv01ploc2", 11, "MS");
        add_map_point(&db, "wv01ploc3", 12, "CA");

        let upcoming: Vec<i64> = db
            .upcoming_elections_with_ballots(Some("MS"), today)
            .unwrap()
            .iter()
            .map(|e| e.election_id)
            .collect();
        // national 11 first by date, CA-only 12 excluded, 13 has no ballots
        assert_eq!(upcoming, vec![11, 10]);
    }

    #[test]
    fn test_last_election_falls_back_to_past() {
        let db = open_test_db();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        db.upsert_election(&election(20, "2023-11-07", Some("MS"))).unwrap();
        db.upsert_election(&election(21, "2024-03-12", Some("MS"))).unwrap();
        db.upsert_election(&election(22, "2024-05-01", Some("AL"))).unwrap();
        add_map_point(&db, "wv01ploc1", 20, "MS");
        add_map_point(&db, "wv01ploc2", 22, "AL");

        let last = db.last_election_with_ballots(Some("MS"), today).unwrap().unwrap();
        assert_eq!(last.election_id, 20);
        assert!(db.last_election_with_ballots(Some("CA"), today).unwrap().is_none());
        assert!(db.upcoming_elections_with_ballots(Some("MS"), today).unwrap().is_empty());

        // without a state, any election with map-point ballots qualifies
        let any = db.last_election_with_ballots(None, today).unwrap().unwrap();
        assert_eq!(any.election_id, 22);
    }
}
