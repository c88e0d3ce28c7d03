//! Ballot location store: one "returned ballot" per (voter or map point, election).
//!
//! Uniqueness of the key is not enforced by a constraint because several
//! processes may resolve the same voter at once. Writers go through
//! [`Db::get_or_create_ballot_location`], which detects a duplicated key,
//! merges it down to the earliest row and retries.

use std::fmt;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{collect_rows, is_busy, now_timestamp, Db, DbError};
use crate::distance::{BoundingBox, GeoPoint};
use crate::validation::is_ballot_we_vote_id;

/// Bounded create/detect/heal attempts before giving up on a key.
pub(crate) const MAX_UPSERT_ATTEMPTS: usize = 3;

/// Owner of a ballot location or ballot item row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LocationKey {
    Voter(i64),
    /// Permanent id of a map point (polling location).
    MapPoint(String),
}

impl LocationKey {
    pub fn voter_id(&self) -> Option<i64> {
        match self {
            LocationKey::Voter(id) => Some(*id),
            LocationKey::MapPoint(_) => None,
        }
    }

    pub fn map_point(&self) -> Option<&str> {
        match self {
            LocationKey::Voter(_) => None,
            LocationKey::MapPoint(id) => Some(id.as_str()),
        }
    }

    pub fn is_map_point(&self) -> bool {
        matches!(self, LocationKey::MapPoint(_))
    }

    /// Rebuilds a key from the two nullable key columns.
    pub(crate) fn from_columns(
        voter_id: Option<i64>,
        map_point: Option<String>,
    ) -> Option<LocationKey> {
        match (voter_id, map_point) {
            (Some(v), None) => Some(LocationKey::Voter(v)),
            (None, Some(m)) => Some(LocationKey::MapPoint(m)),
            _ => None,
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKey::Voter(id) => write!(f, "voter {}", id),
            LocationKey::MapPoint(id) => write!(f, "map point {}", id),
        }
    }
}

/// Explicit reference to a ballot location supplied by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotRef {
    WeVoteId(String),
    Shortcut(String),
}

impl BallotRef {
    /// `wv01ballot12` is a permanent id; anything else is a shortcut.
    pub fn parse(input: &str) -> BallotRef {
        let trimmed = input.trim().to_lowercase();
        if is_ballot_we_vote_id(&trimmed) {
            BallotRef::WeVoteId(trimmed)
        } else {
            BallotRef::Shortcut(trimmed)
        }
    }
}

impl fmt::Display for BallotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallotRef::WeVoteId(id) => write!(f, "{}", id),
            BallotRef::Shortcut(s) => write!(f, "shortcut '{}'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BallotLocation {
    pub id: i64,
    pub we_vote_id: String,
    pub key: LocationKey,
    pub election_id: i64,
    pub election_description: Option<String>,
    pub election_date: Option<String>,
    pub text_for_map_search: String,
    pub normalized_line1: Option<String>,
    pub normalized_line2: Option<String>,
    pub normalized_city: Option<String>,
    pub normalized_state: Option<String>,
    pub normalized_zip: Option<String>,
    pub state_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub display_option_on: bool,
    pub display_name: Option<String>,
    pub shortcut: Option<String>,
    pub display_order: i64,
    pub created_at: String,
    pub date_last_updated: String,
}

impl BallotLocation {
    pub fn point(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }

    pub fn is_map_point(&self) -> bool {
        self.key.is_map_point()
    }

    /// "line1, city, ST zip" when the normalized parts needed to geocode it exist.
    pub fn full_address(&self) -> Option<String> {
        let line1 = self.normalized_line1.as_deref()?;
        let city = self.normalized_city.as_deref()?;
        let state = self.normalized_state.as_deref()?;
        let mut out = format!("{}, {}, {}", line1, city, state);
        if let Some(zip) = self.normalized_zip.as_deref() {
            out.push(' ');
            out.push_str(zip);
        }
        Some(out)
    }
}

/// Values written by an upsert. `None` leaves the stored value untouched on
/// update and uses the column default on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BallotLocationFields {
    pub election_description: Option<String>,
    pub election_date: Option<String>,
    pub text_for_map_search: Option<String>,
    pub normalized_line1: Option<String>,
    pub normalized_line2: Option<String>,
    pub normalized_city: Option<String>,
    pub normalized_state: Option<String>,
    pub normalized_zip: Option<String>,
    pub state_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub display_option_on: Option<bool>,
    pub display_name: Option<String>,
    pub shortcut: Option<String>,
    pub display_order: Option<i64>,
}

/// A candidate ballot and its distance from the search origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyBallot {
    pub location: BallotLocation,
    pub distance_miles: f64,
}

/// Text search over map-point ballots, used when geocoding finds nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSearch {
    pub election_id: i64,
    pub state_code: Option<String>,
    /// Rows in this city sort first.
    pub city: Option<String>,
    /// Loose containment against the stored search text and city.
    pub contains: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocationFilter {
    pub election_id: Option<i64>,
    pub state_code: Option<String>,
    pub search: Option<String>,
    pub display_option_on: Option<bool>,
    /// Voter-owned rows hold voter addresses and are hidden unless asked for.
    pub include_voter_rows: bool,
    pub limit: Option<usize>,
}

const LOCATION_COLUMNS: &str = "id, we_vote_id, voter_id, polling_location_we_vote_id, election_id,
    election_description, election_date, text_for_map_search, normalized_line1, normalized_line2,
    normalized_city, normalized_state, normalized_zip, state_code, latitude, longitude,
    display_option_on, display_name, shortcut, display_order, created_at, date_last_updated";

const KEY_MATCH: &str = "voter_id IS ?1 AND polling_location_we_vote_id IS ?2 AND election_id = ?3";

fn location_from_row(row: &Row) -> rusqlite::Result<BallotLocation> {
    let key = LocationKey::from_columns(row.get(2)?, row.get(3)?).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            2,
            "voter_id/polling_location_we_vote_id".to_string(),
            rusqlite::types::Type::Null,
        )
    })?;
    Ok(BallotLocation {
        id: row.get(0)?,
        we_vote_id: row.get(1)?,
        key,
        election_id: row.get(4)?,
        election_description: row.get(5)?,
        election_date: row.get(6)?,
        text_for_map_search: row.get(7)?,
        normalized_line1: row.get(8)?,
        normalized_line2: row.get(9)?,
        normalized_city: row.get(10)?,
        normalized_state: row.get(11)?,
        normalized_zip: row.get(12)?,
        state_code: row.get(13)?,
        latitude: row.get(14)?,
        longitude: row.get(15)?,
        display_option_on: row.get(16)?,
        display_name: row.get(17)?,
        shortcut: row.get(18)?,
        display_order: row.get(19)?,
        created_at: row.get(20)?,
        date_last_updated: row.get(21)?,
    })
}

fn clean_state(state: &Option<String>) -> Option<String> {
    state
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

fn clean_shortcut(shortcut: &Option<String>) -> Option<String> {
    shortcut
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

impl Db {
    /// Returns the single row for `(key, election_id)`, creating it if
    /// needed and applying `fields` either way. The boolean is `true` when a
    /// new row was created.
    ///
    /// A duplicated key is merged down to its earliest row and the write is
    /// retried; [`DbError::DuplicateRows`] is returned only if that does not
    /// converge.
    pub fn get_or_create_ballot_location(
        &self,
        key: &LocationKey,
        election_id: i64,
        fields: &BallotLocationFields,
    ) -> Result<(BallotLocation, bool), DbError> {
        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let outcome = self
                .write_ballot_location(key, election_id, fields)
                .and_then(|written| {
                    if written.is_none() {
                        let removed = self.merge_duplicate_locations(key, election_id)?;
                        debug!(
                            "Healed {} duplicate ballot locations for {} election {} (attempt {}/{})",
                            removed, key, election_id, attempt, MAX_UPSERT_ATTEMPTS
                        );
                    }
                    Ok(written)
                });

            match outcome {
                Ok(Some((id, created))) => {
                    let location = self.get_ballot_location_by_id(id)?.ok_or_else(|| {
                        DbError::InvalidData(format!("ballot location {} vanished after write", id))
                    })?;
                    return Ok((location, created));
                }
                Ok(None) => {}
                Err(e) if is_busy(&e) && attempt < MAX_UPSERT_ATTEMPTS => {
                    debug!(
                        "Store busy writing {} election {} (attempt {}/{})",
                        key, election_id, attempt, MAX_UPSERT_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DbError::DuplicateRows {
            table: "ballot_locations",
            key: format!("{} election {}", key, election_id),
        })
    }

    /// One write under the write lock. `None` means the key is duplicated
    /// and nothing was written.
    fn write_ballot_location(
        &self,
        key: &LocationKey,
        election_id: i64,
        fields: &BallotLocationFields,
    ) -> Result<Option<(i64, bool)>, DbError> {
        let tx = self.write_tx()?;
        let ids: Vec<i64> = {
            let sql = format!("SELECT id FROM ballot_locations WHERE {} ORDER BY id LIMIT 2", KEY_MATCH);
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![key.voter_id(), key.map_point(), election_id],
                |row| row.get(0),
            )?;
            collect_rows(rows)?
        };

        let (id, created) = match ids.as_slice() {
            [] => {
                let we_vote_id = self.next_ballot_we_vote_id()?;
                let now = now_timestamp();
                tx.execute(
                    "INSERT INTO ballot_locations (we_vote_id, voter_id, polling_location_we_vote_id,
                        election_id, election_description, election_date, text_for_map_search,
                        normalized_line1, normalized_line2, normalized_city, normalized_state,
                        normalized_zip, state_code, latitude, longitude, display_option_on,
                        display_name, shortcut, display_order, created_at, date_last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?20)",
                    params![
                        we_vote_id,
                        key.voter_id(),
                        key.map_point(),
                        election_id,
                        fields.election_description,
                        fields.election_date,
                        fields.text_for_map_search.as_deref().unwrap_or(""),
                        fields.normalized_line1,
                        fields.normalized_line2,
                        fields.normalized_city,
                        fields.normalized_state,
                        fields.normalized_zip,
                        clean_state(&fields.state_code),
                        fields.latitude,
                        fields.longitude,
                        fields.display_option_on.unwrap_or(false),
                        fields.display_name,
                        clean_shortcut(&fields.shortcut),
                        fields.display_order.unwrap_or(0),
                        now,
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
            [id] => {
                tx.execute(
                    "UPDATE ballot_locations SET
                        election_description = COALESCE(?1, election_description),
                        election_date = COALESCE(?2, election_date),
                        text_for_map_search = COALESCE(?3, text_for_map_search),
                        normalized_line1 = COALESCE(?4, normalized_line1),
                        normalized_line2 = COALESCE(?5, normalized_line2),
                        normalized_city = COALESCE(?6, normalized_city),
                        normalized_state = COALESCE(?7, normalized_state),
                        normalized_zip = COALESCE(?8, normalized_zip),
                        state_code = COALESCE(?9, state_code),
                        latitude = COALESCE(?10, latitude),
                        longitude = COALESCE(?11, longitude),
                        display_option_on = COALESCE(?12, display_option_on),
                        display_name = COALESCE(?13, display_name),
                        shortcut = COALESCE(?14, shortcut),
                        display_order = COALESCE(?15, display_order),
                        date_last_updated = ?16
                     WHERE id = ?17",
                    params![
                        fields.election_description,
                        fields.election_date,
                        fields.text_for_map_search,
                        fields.normalized_line1,
                        fields.normalized_line2,
                        fields.normalized_city,
                        fields.normalized_state,
                        fields.normalized_zip,
                        clean_state(&fields.state_code),
                        fields.latitude,
                        fields.longitude,
                        fields.display_option_on,
                        fields.display_name,
                        clean_shortcut(&fields.shortcut),
                        fields.display_order,
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

    /// Collapses every row for `(key, election_id)` into the earliest one.
    /// Voter ballots pointing at a removed row are re-pointed at the survivor.
    /// Returns how many rows were deleted.
    pub fn merge_duplicate_locations(
        &self,
        key: &LocationKey,
        election_id: i64,
    ) -> Result<usize, DbError> {
        let tx = self.write_tx()?;
        let rows: Vec<(i64, String, Option<String>, Option<String>)> = {
            let sql = format!(
                "SELECT id, we_vote_id, display_name, shortcut FROM ballot_locations WHERE {} ORDER BY id",
                KEY_MATCH
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![key.voter_id(), key.map_point(), election_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
            collect_rows(rows)?
        };

        let Some(((_, keep_we_vote_id, keep_name, keep_shortcut), duplicates)) = rows.split_first()
        else {
            return Ok(0);
        };

        for (id, we_vote_id, _, _) in duplicates {
            tx.execute(
                "UPDATE voter_ballots SET
                    ballot_location_we_vote_id = ?1,
                    ballot_location_display_name = ?2,
                    ballot_location_shortcut = ?3
                 WHERE ballot_location_we_vote_id = ?4",
                params![keep_we_vote_id, keep_name, keep_shortcut, we_vote_id],
            )?;
            tx.execute("DELETE FROM ballot_locations WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        if !duplicates.is_empty() {
            info!(
                "Merged {} duplicate ballot locations for {} election {} into {}",
                duplicates.len(),
                key,
                election_id,
                keep_we_vote_id
            );
        }
        Ok(duplicates.len())
    }

    /// Map-point ballots for `election_id` within `radius_miles` of `origin`,
    /// nearest first. Equal distances order by row id.
    pub fn find_ballot_locations_within(
        &self,
        origin: GeoPoint,
        state_code: Option<&str>,
        election_id: i64,
        radius_miles: f64,
    ) -> Result<Vec<NearbyBallot>, DbError> {
        let bbox = BoundingBox::around(origin, radius_miles);
        let mut sql = format!(
            "SELECT {} FROM ballot_locations
             WHERE polling_location_we_vote_id IS NOT NULL
               AND election_id = ?1
               AND latitude IS NOT NULL AND longitude IS NOT NULL
               AND latitude BETWEEN ?2 AND ?3",
            LOCATION_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(election_id),
            Box::new(bbox.min_latitude),
            Box::new(bbox.max_latitude),
        ];
        let mut param_idx = 4;

        if let Some((min, max)) = bbox.longitude_range {
            sql.push_str(&format!(
                " AND longitude BETWEEN ?{} AND ?{}",
                param_idx,
                param_idx + 1
            ));
            params_vec.push(Box::new(min));
            params_vec.push(Box::new(max));
            param_idx += 2;
        }
        if let Some(state) = state_code {
            sql.push_str(&format!(" AND state_code = ?{}", param_idx));
            params_vec.push(Box::new(state.trim().to_uppercase()));
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), location_from_row)?;

        let mut nearby: Vec<NearbyBallot> = collect_rows(rows)?
            .into_iter()
            .filter_map(|location| {
                let distance_miles = origin.miles_to(&location.point()?);
                (distance_miles <= radius_miles).then_some(NearbyBallot {
                    location,
                    distance_miles,
                })
            })
            .collect();
        nearby.sort_by(|a, b| {
            a.distance_miles
                .total_cmp(&b.distance_miles)
                .then(a.location.id.cmp(&b.location.id))
        });
        Ok(nearby)
    }

    /// Nearest map-point ballot within the radius, if any.
    pub fn find_nearest_ballot_location(
        &self,
        origin: GeoPoint,
        state_code: Option<&str>,
        election_id: i64,
        radius_miles: f64,
    ) -> Result<Option<NearbyBallot>, DbError> {
        Ok(self
            .find_ballot_locations_within(origin, state_code, election_id, radius_miles)?
            .into_iter()
            .next())
    }

    /// Best map-point ballot matching a text search: rows in the requested
    /// city first, then by row id.
    pub fn find_ballot_location_by_text(
        &self,
        search: &TextSearch,
    ) -> Result<Option<BallotLocation>, DbError> {
        let mut sql = format!(
            "SELECT {} FROM ballot_locations
             WHERE polling_location_we_vote_id IS NOT NULL AND election_id = ?1",
            LOCATION_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(search.election_id)];
        let mut param_idx = 2;

        if let Some(state) = clean_state(&search.state_code) {
            sql.push_str(&format!(" AND state_code = ?{}", param_idx));
            params_vec.push(Box::new(state));
            param_idx += 1;
        }
        if let Some(text) = search.contains.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            sql.push_str(&format!(
                " AND (text_for_map_search LIKE ?{n} OR normalized_city LIKE ?{n})",
                n = param_idx
            ));
            params_vec.push(Box::new(format!("%{}%", text)));
            param_idx += 1;
        }
        match search.city.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(city) => {
                sql.push_str(&format!(
                    " ORDER BY CASE WHEN LOWER(normalized_city) = ?{} THEN 0 ELSE 1 END, id LIMIT 1",
                    param_idx
                ));
                params_vec.push(Box::new(city.to_lowercase()));
            }
            None => sql.push_str(" ORDER BY id LIMIT 1"),
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        self.conn()
            .query_row(&sql, param_refs.as_slice(), location_from_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Number of map-point ballots for an election, optionally in one state.
    pub fn count_map_point_ballots(
        &self,
        election_id: i64,
        state_code: Option<&str>,
    ) -> Result<i64, DbError> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM ballot_locations
             WHERE polling_location_we_vote_id IS NOT NULL
               AND election_id = ?1
               AND (?2 IS NULL OR state_code = ?2)",
            params![election_id, state_code.map(|s| s.trim().to_uppercase())],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// A stable "any ballot for this election" pick: map-point rows with a
    /// public shortcut first, then by row id.
    pub fn preview_ballot_location_for_election(
        &self,
        election_id: i64,
    ) -> Result<Option<BallotLocation>, DbError> {
        let sql = format!(
            "SELECT {} FROM ballot_locations
             WHERE polling_location_we_vote_id IS NOT NULL AND election_id = ?1
             ORDER BY CASE WHEN shortcut IS NULL OR shortcut = '' THEN 1 ELSE 0 END, id
             LIMIT 1",
            LOCATION_COLUMNS
        );
        self.conn()
            .query_row(&sql, params![election_id], location_from_row)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_ballot_location_by_id(&self, id: i64) -> Result<Option<BallotLocation>, DbError> {
        let sql = format!("SELECT {} FROM ballot_locations WHERE id = ?1", LOCATION_COLUMNS);
        self.conn()
            .query_row(&sql, params![id], location_from_row)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_ballot_location_by_we_vote_id(
        &self,
        we_vote_id: &str,
    ) -> Result<Option<BallotLocation>, DbError> {
        let sql = format!("SELECT {} FROM ballot_locations WHERE we_vote_id = ?1", LOCATION_COLUMNS);
        self.conn()
            .query_row(&sql, params![we_vote_id.trim().to_lowercase()], location_from_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Shortcuts are not unique across elections; the earliest row wins.
    pub fn get_ballot_location_by_shortcut(
        &self,
        shortcut: &str,
    ) -> Result<Option<BallotLocation>, DbError> {
        let sql = format!(
            "SELECT {} FROM ballot_locations WHERE shortcut = ?1 ORDER BY id LIMIT 1",
            LOCATION_COLUMNS
        );
        self.conn()
            .query_row(&sql, params![shortcut.trim().to_lowercase()], location_from_row)
            .optional()
            .map_err(DbError::from)
    }

    pub fn get_ballot_location_by_ref(
        &self,
        ballot_ref: &BallotRef,
    ) -> Result<Option<BallotLocation>, DbError> {
        match ballot_ref {
            // A shortcut may be shaped like an id.
            BallotRef::WeVoteId(id) => match self.get_ballot_location_by_we_vote_id(id)? {
                Some(location) => Ok(Some(location)),
                None => self.get_ballot_location_by_shortcut(id),
            },
            BallotRef::Shortcut(s) => self.get_ballot_location_by_shortcut(s),
        }
    }

    /// Earliest row for a key; duplicates are left for the writers to heal.
    pub fn get_ballot_location_by_key(
        &self,
        key: &LocationKey,
        election_id: i64,
    ) -> Result<Option<BallotLocation>, DbError> {
        let sql = format!(
            "SELECT {} FROM ballot_locations WHERE {} ORDER BY id LIMIT 1",
            LOCATION_COLUMNS, KEY_MATCH
        );
        self.conn()
            .query_row(
                &sql,
                params![key.voter_id(), key.map_point(), election_id],
                location_from_row,
            )
            .optional()
            .map_err(DbError::from)
    }

    /// Bumps `date_last_updated`. Returns false if the id is unknown.
    pub fn touch_ballot_location(&self, we_vote_id: &str) -> Result<bool, DbError> {
        let changed = self.conn().execute(
            "UPDATE ballot_locations SET date_last_updated = ?1 WHERE we_vote_id = ?2",
            params![now_timestamp(), we_vote_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_ballot_locations(
        &self,
        filter: &LocationFilter,
    ) -> Result<Vec<BallotLocation>, DbError> {
        let mut sql = format!("SELECT {} FROM ballot_locations WHERE 1=1", LOCATION_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if !filter.include_voter_rows {
            sql.push_str(" AND polling_location_we_vote_id IS NOT NULL");
        }
        if let Some(election_id) = filter.election_id {
            sql.push_str(&format!(" AND election_id = ?{}", param_idx));
            params_vec.push(Box::new(election_id));
            param_idx += 1;
        }
        if let Some(state) = clean_state(&filter.state_code) {
            sql.push_str(&format!(" AND state_code = ?{}", param_idx));
            params_vec.push(Box::new(state));
            param_idx += 1;
        }
        if let Some(ref search) = filter.search {
            sql.push_str(&format!(
                " AND (text_for_map_search LIKE ?{n} OR display_name LIKE ?{n} OR normalized_city LIKE ?{n})",
                n = param_idx
            ));
            params_vec.push(Box::new(format!("%{}%", search.trim())));
            param_idx += 1;
        }
        if let Some(on) = filter.display_option_on {
            sql.push_str(&format!(" AND display_option_on = ?{}", param_idx));
            params_vec.push(Box::new(on));
            param_idx += 1;
        }

        sql.push_str(" ORDER BY election_id, display_order, id");
        if let Some(n) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let _ = param_idx;

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), location_from_row)?;
        collect_rows(rows)
    }

    /// Ballots offered as selectable choices for an election.
    pub fn count_display_option_on(&self, election_id: i64) -> Result<i64, DbError> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM ballot_locations WHERE election_id = ?1 AND display_option_on = 1",
            params![election_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Rows with a full normalized address but no coordinates, oldest first.
    pub fn locations_missing_coordinates(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<BallotLocation>, DbError> {
        let mut sql = format!(
            "SELECT {} FROM ballot_locations
             WHERE (latitude IS NULL OR longitude IS NULL)
               AND normalized_line1 IS NOT NULL AND normalized_line1 != ''
               AND normalized_city IS NOT NULL AND normalized_city != ''
               AND normalized_state IS NOT NULL AND normalized_state != ''
             ORDER BY id",
            LOCATION_COLUMNS
        );
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], location_from_row)?;
        collect_rows(rows)
    }

    pub fn update_location_coordinates(
        &self,
        id: i64,
        point: GeoPoint,
    ) -> Result<(), DbError> {
        self.conn().execute(
            "UPDATE ballot_locations SET latitude = ?1, longitude = ?2, date_last_updated = ?3
             WHERE id = ?4",
            params![point.latitude, point.longitude, now_timestamp(), id],
        )?;
        Ok(())
    }

    /// Admin hard delete: removes the location, the items stored under its
    /// key for that election, and detaches voter ballots that pointed at it.
    pub fn delete_ballot_location(&self, we_vote_id: &str) -> Result<bool, DbError> {
        let Some(location) = self.get_ballot_location_by_we_vote_id(we_vote_id)? else {
            return Ok(false);
        };
        let tx = self.write_tx()?;
        tx.execute(
            "DELETE FROM ballot_items
             WHERE voter_id IS ?1 AND polling_location_we_vote_id IS ?2 AND election_id = ?3",
            params![
                location.key.voter_id(),
                location.key.map_point(),
                location.election_id
            ],
        )?;
        tx.execute(
            "UPDATE voter_ballots SET ballot_location_we_vote_id = NULL
             WHERE ballot_location_we_vote_id = ?1",
            params![location.we_vote_id],
        )?;
        tx.execute(
            "DELETE FROM ballot_locations WHERE id = ?1",
            params![location.id],
        )?;
        tx.commit()?;
        info!("Deleted ballot location {} ({})", location.we_vote_id, location.key);
        Ok(true)
    }

    /// Every `(key, election)` with more than one row.
    pub fn duplicate_location_keys(
        &self,
        election_id: Option<i64>,
    ) -> Result<Vec<(LocationKey, i64)>, DbError> {
        let mut stmt = self.conn().prepare(
            "SELECT voter_id, polling_location_we_vote_id, election_id
             FROM ballot_locations
             WHERE (?1 IS NULL OR election_id = ?1)
             GROUP BY voter_id, polling_location_we_vote_id, election_id
             HAVING COUNT(*) > 1
             ORDER BY election_id, MIN(id)",
        )?;
        let rows = stmt.query_map(params![election_id], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        Ok(collect_rows(rows)?
            .into_iter()
            .filter_map(|(voter, map_point, election)| {
                LocationKey::from_columns(voter, map_point).map(|key| (key, election))
            })
            .collect())
    }
}
