//! Pushes master-record edits into the ballot item cache and runs the
//! batch healing jobs.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::ballot_item::BallotSubject;
use crate::db::Db;
use crate::error::BallotError;
use crate::geocoder::{GeocodeOutcome, GeocoderAdapter};
use crate::distance::GeoPoint;
use crate::master::MasterRecordProvider;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub offices: usize,
    pub measures: usize,
    pub items_updated: usize,
    /// Referenced offices or measures with no master record.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    pub location_keys: usize,
    pub locations_removed: usize,
    pub item_triples: usize,
    pub items_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub scanned: usize,
    pub updated: usize,
    pub not_found: usize,
    /// The run stopped early because the geocoder is out of quota.
    pub quota_exceeded: bool,
}

pub struct CacheRefresher {
    db: Arc<Mutex<Db>>,
}

impl CacheRefresher {
    pub fn new(db: Arc<Mutex<Db>>) -> Self {
        Self { db }
    }

    /// Copies the office's current name and order into every item that
    /// references it.
    pub fn refresh_office(&self, we_vote_id: &str) -> Result<usize, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        let office = db
            .get_office(we_vote_id)?
            .ok_or_else(|| BallotError::MasterRecordNotFound(we_vote_id.to_string()))?;
        let updated = db.refresh_all_for_office(&office)?;
        info!("Refreshed {} ballot items for office {}", updated, we_vote_id);
        Ok(updated)
    }

    pub fn refresh_measure(&self, we_vote_id: &str) -> Result<usize, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        let measure = db
            .get_measure(we_vote_id)?
            .ok_or_else(|| BallotError::MasterRecordNotFound(we_vote_id.to_string()))?;
        let updated = db.refresh_all_for_measure(&measure)?;
        info!("Refreshed {} ballot items for measure {}", updated, we_vote_id);
        Ok(updated)
    }

    pub fn refresh_subject(&self, subject: &BallotSubject) -> Result<usize, BallotError> {
        match subject {
            BallotSubject::Office(id) => self.refresh_office(id),
            BallotSubject::Measure(id) => self.refresh_measure(id),
        }
    }

    /// Refreshes every office and measure the election's items reference.
    /// Missing master records are reported, not fatal.
    pub fn refresh_election(&self, election_id: i64) -> Result<RefreshSummary, BallotError> {
        let subjects = {
            let db = self.db.lock().expect("db mutex poisoned");
            db.distinct_subjects_for_election(election_id)?
        };
        let mut summary = RefreshSummary::default();
        for subject in &subjects {
            match self.refresh_subject(subject) {
                Ok(updated) => {
                    summary.items_updated += updated;
                    match subject {
                        BallotSubject::Office(_) => summary.offices += 1,
                        BallotSubject::Measure(_) => summary.measures += 1,
                    }
                }
                Err(BallotError::MasterRecordNotFound(id)) => {
                    warn!("No master record for {} referenced in election {}", id, election_id);
                    summary.missing.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Election {}: refreshed {} offices, {} measures ({} items)",
            election_id, summary.offices, summary.measures, summary.items_updated
        );
        Ok(summary)
    }

    /// Heals every duplicated location key, then every duplicated item
    /// triple. Safe to re-run.
    pub fn merge_all_duplicates(&self, election_id: Option<i64>) -> Result<DedupSummary, BallotError> {
        let db = self.db.lock().expect("db mutex poisoned");
        let mut summary = DedupSummary::default();

        for (key, election) in db.duplicate_location_keys(election_id)? {
            summary.location_keys += 1;
            summary.locations_removed += db.merge_duplicate_locations(&key, election)?;
        }
        for (key, election, subject) in db.duplicate_item_keys(election_id)? {
            summary.item_triples += 1;
            summary.items_removed += db.remove_duplicate_ballot_items(&key, election, &subject)?;
        }

        if summary.location_keys > 0 || summary.item_triples > 0 {
            info!(
                "Merged {} duplicated locations ({} rows removed) and {} duplicated items ({} rows removed)",
                summary.location_keys,
                summary.locations_removed,
                summary.item_triples,
                summary.items_removed
            );
        }
        Ok(summary)
    }

    /// Geocodes locations that have a full normalized address but no
    /// coordinates. Stops at the first quota failure.
    pub async fn backfill_coordinates(
        &self,
        geocoder: &GeocoderAdapter,
        limit: Option<usize>,
    ) -> Result<BackfillSummary, BallotError> {
        let pending = {
            let db = self.db.lock().expect("db mutex poisoned");
            db.locations_missing_coordinates(limit)?
        };
        let mut summary = BackfillSummary::default();

        for location in pending {
            let Some(address) = location.full_address() else {
                continue;
            };
            summary.scanned += 1;
            match geocoder.locate(&address).await {
                GeocodeOutcome::Found(found) => {
                    let db = self.db.lock().expect("db mutex poisoned");
                    db.update_location_coordinates(
                        location.id,
                        GeoPoint::new(found.latitude, found.longitude),
                    )?;
                    summary.updated += 1;
                }
                GeocodeOutcome::NotFound => {
                    warn!("No coordinates for {} ({})", location.we_vote_id, address);
                    summary.not_found += 1;
                }
                GeocodeOutcome::QuotaExceeded => {
                    warn!("Geocoder quota exceeded, stopping coordinate backfill");
                    summary.quota_exceeded = true;
                    break;
                }
            }
        }

        info!(
            "Coordinate backfill: {} scanned, {} updated, {} not found",
            summary.scanned, summary.updated, summary.not_found
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot_item::BallotEntryFields;
    use crate::ballot_location::LocationKey;
    use crate::master::{ContestMeasure, ContestOffice};

    fn shared_db() -> Arc<Mutex<Db>> {
        let db = Db::open_in_memory().expect("open in-memory db");
        db.init().expect("init schema");
        Arc::new(Mutex::new(db))
    }

    fn measure(id: &str, subtitle: &str) -> ContestMeasure {
        ContestMeasure {
            we_vote_id: id.to_string(),
            measure_title: "Measure A".to_string(),
            ballot_order: Some(3),
            measure_subtitle: Some(subtitle.to_string()),
            measure_text: None,
            measure_url: None,
            yes_vote_description: None,
            no_vote_description: None,
            election_id: Some(7),
            state_code: Some("CA".to_string()),
        }
    }

    #[test]
    fn missing_master_record_is_reported() {
        let refresher = CacheRefresher::new(shared_db());
        let err = refresher.refresh_office("wv01off404").unwrap_err();
        assert!(matches!(err, BallotError::MasterRecordNotFound(id) if id == "wv01off404"));
    }

    #[test]
    fn refresh_measure_updates_every_reference() {
        let db = shared_db();
        {
            let db = db.lock().unwrap();
            let m = measure("wv01meas1", "old");
            db.upsert_measure(&m).unwrap();
            let subject = BallotSubject::Measure(m.we_vote_id.clone());
            for key in [
                LocationKey::MapPoint("wv01ploc1".into()),
                LocationKey::Voter(5),
            ] {
                db.upsert_ballot_item(&key, 7, &subject, &BallotEntryFields::from_measure(&m))
                    .unwrap();
            }
            db.upsert_measure(&measure("wv01meas1", "new")).unwrap();
        }

        let refresher = CacheRefresher::new(Arc::clone(&db));
        assert_eq!(refresher.refresh_measure("wv01meas1").unwrap(), 2);

        let db = db.lock().unwrap();
        let items = db
            .ballot_items_for_location(&LocationKey::Voter(5), 7)
            .unwrap();
        assert_eq!(items[0].measure_subtitle.as_deref(), Some("new"));
    }

    #[test]
    fn refresh_election_counts_missing_records() {
        let db = shared_db();
        {
            let db = db.lock().unwrap();
            let office = ContestOffice {
                we_vote_id: "wv01off1".into(),
                office_name: "Mayor".into(),
                ballot_order: Some(1),
                election_id: Some(7),
                state_code: None,
            };
            db.upsert_office(&office).unwrap();
            let key = LocationKey::MapPoint("wv01ploc1".into());
            db.upsert_ballot_item(
                &key,
                7,
                &BallotSubject::Office("wv01off1".into()),
                &BallotEntryFields::from_office(&office),
            )
            .unwrap();
            db.upsert_ballot_item(
                &key,
                7,
                &BallotSubject::Office("wv01off2".into()),
                &BallotEntryFields {
                    display_name: Some("Sheriff".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let summary = CacheRefresher::new(db).refresh_election(7).unwrap();
        assert_eq!(summary.offices, 1);
        assert_eq!(summary.items_updated, 1);
        assert_eq!(summary.missing, vec!["wv01off2".to_string()]);
    }

    #[test]
    fn merge_all_duplicates_is_rerunnable() {
        let db = shared_db();
        {
            let db = db.lock().unwrap();
            for _ in 0..2 {
                db.conn()
                    .execute(
                        "INSERT INTO ballot_items (polling_location_we_vote_id, election_id,
                            contest_office_we_vote_id, ballot_item_display_name, date_last_updated)
                         VALUES ('wv01ploc1', 7, 'wv01off1', 'Mayor', '2024-01-01T00:00:00Z')",
                        [],
                    )
                    .unwrap();
            }
        }
        let refresher = CacheRefresher::new(db);
        let first = refresher.merge_all_duplicates(None).unwrap();
        assert_eq!(first.item_triples, 1);
        assert_eq!(first.items_removed, 1);
        assert_eq!(refresher.merge_all_duplicates(Some(7)).unwrap(), DedupSummary::default());
    }
}
