//! Ballot resolution: from a voter's address (or an explicit ballot or
//! election) to the one stored ballot that should be shown.
//!
//! Precedence, each step short-circuiting:
//! 1. an explicit permanent id or shortcut
//! 2. an election with no address text: that election's preview ballot
//! 3. empty text: `AddressMissing`
//! 4. geocode, then the nearest map-point ballot within the radius, scoped
//!    to the requested election or to the state's next qualifying one
//! 5. geocoder found nothing: "City, ST" text search
//!
//! Every outcome is returned as a [`Resolution`] with a status; failures
//! are not `Err`.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use geocoder_api::GeocodedAddress;
use serde::Serialize;
use tracing::{debug, warn};

use crate::address::{breakdown_from_text, parse_city_state, state_code_from_formatted, AddressBreakdown};
use crate::ballot_location::{
    BallotLocation, BallotLocationFields, BallotRef, NearbyBallot, TextSearch, LocationKey,
};
use crate::cache::address_key;
use crate::db::Db;
use crate::distance::{GeoPoint, MAX_SEARCH_RADIUS_MILES};
use crate::election::{Election, ElectionCatalog};
use crate::error::BallotError;
use crate::geocoder::{GeocodeOutcome, GeocoderAdapter};
use crate::validation::{validate_address_text, validate_election_id, validate_voter_id};
use crate::voter_ballot::{VoterBallot, VoterBallotCache, VoterBallotRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveRequest {
    pub voter_id: i64,
    pub address_text: String,
    pub election_id: Option<i64>,
    pub ballot_ref: Option<BallotRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    Found,
    AddressMissing,
    GeocoderQuotaExceeded,
    GeocoderNoResult,
    NoBallotWithinRadius,
    NoElectionDataForState,
    MasterRecordNotFound,
    BallotNotFound,
    InvalidInput,
    /// Store or provider failure that is not part of the resolution policy.
    InternalError,
}

impl From<&BallotError> for ResolutionStatus {
    fn from(err: &BallotError) -> Self {
        match err {
            BallotError::AddressMissing => ResolutionStatus::AddressMissing,
            BallotError::GeocoderQuotaExceeded => ResolutionStatus::GeocoderQuotaExceeded,
            BallotError::GeocoderNoResult(_) => ResolutionStatus::GeocoderNoResult,
            BallotError::NoBallotWithinRadius { .. } => ResolutionStatus::NoBallotWithinRadius,
            BallotError::NoElectionDataForState(_) => ResolutionStatus::NoElectionDataForState,
            BallotError::MasterRecordNotFound(_) => ResolutionStatus::MasterRecordNotFound,
            BallotError::BallotNotFound(_) => ResolutionStatus::BallotNotFound,
            BallotError::InvalidInput(_) => ResolutionStatus::InvalidInput,
            BallotError::Database(_) | BallotError::Geocoder(_) => ResolutionStatus::InternalError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExplicitRef,
    ElectionPreview,
    Nearest,
    TextSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub status: ResolutionStatus,
    pub ballot_location: Option<BallotLocation>,
    pub match_method: Option<MatchMethod>,
    /// The ballot belongs to a nearby location, not the voter's exact address.
    pub substituted: bool,
    /// No upcoming election had a ballot; the most recent past one was used.
    pub election_fallback: bool,
    /// The state restriction was dropped to find a ballot for the election.
    pub state_relaxed: bool,
    pub distance_miles: Option<f64>,
    pub voter_ballot: Option<VoterBallot>,
    pub message: Option<String>,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        self.status == ResolutionStatus::Found
    }

    fn failed(err: &BallotError) -> Self {
        Self {
            status: ResolutionStatus::from(err),
            ballot_location: None,
            match_method: None,
            substituted: false,
            election_fallback: false,
            state_relaxed: false,
            distance_miles: None,
            voter_ballot: None,
            message: Some(err.to_string()),
        }
    }
}

/// A ballot picked by one of the resolution steps, before it is recorded.
struct Matched {
    location: BallotLocation,
    method: MatchMethod,
    distance_miles: Option<f64>,
    election_fallback: bool,
    state_relaxed: bool,
    geocoded: Option<GeocodedAddress>,
}

impl Matched {
    fn new(location: BallotLocation, method: MatchMethod) -> Self {
        Self {
            location,
            method,
            distance_miles: None,
            election_fallback: false,
            state_relaxed: false,
            geocoded: None,
        }
    }

    fn nearby(nearby: NearbyBallot, geocoded: &GeocodedAddress) -> Self {
        Self {
            distance_miles: Some(nearby.distance_miles),
            geocoded: Some(geocoded.clone()),
            ..Self::new(nearby.location, MatchMethod::Nearest)
        }
    }
}

pub struct BallotResolver {
    geocoder: Arc<GeocoderAdapter>,
    db: Arc<Mutex<Db>>,
    voter_ballots: VoterBallotCache,
    radius_miles: f64,
    today: Option<NaiveDate>,
}

impl BallotResolver {
    pub fn new(geocoder: Arc<GeocoderAdapter>, db: Arc<Mutex<Db>>) -> Self {
        let voter_ballots = VoterBallotCache::new(Arc::clone(&db), Some(Arc::clone(&geocoder)));
        Self {
            geocoder,
            db,
            voter_ballots,
            radius_miles: MAX_SEARCH_RADIUS_MILES,
            today: None,
        }
    }

    pub fn with_radius(mut self, radius_miles: f64) -> Self {
        self.radius_miles = radius_miles;
        self
    }

    /// Pins "today" for election scoping.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn voter_ballots(&self) -> &VoterBallotCache {
        &self.voter_ballots
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub async fn resolve_ballot_for_voter(
        &self,
        voter_id: i64,
        address_text: &str,
        election_id: Option<i64>,
    ) -> Resolution {
        self.resolve(&ResolveRequest {
            voter_id,
            address_text: address_text.to_string(),
            election_id,
            ballot_ref: None,
        })
        .await
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Resolution {
        match self.try_resolve(request).await {
            Ok(resolution) => resolution,
            Err(err) => {
                match &err {
                    BallotError::Database(_) | BallotError::Geocoder(_) => {
                        warn!("Resolution failed for voter {}: {}", request.voter_id, err)
                    }
                    _ => debug!("No ballot for voter {}: {}", request.voter_id, err),
                }
                Resolution::failed(&err)
            }
        }
    }

    async fn try_resolve(&self, request: &ResolveRequest) -> Result<Resolution, BallotError> {
        let voter_id = validate_voter_id(request.voter_id)?;
        if let Some(election_id) = request.election_id {
            validate_election_id(election_id)?;
        }
        let text = validate_address_text(&request.address_text)?;

        let matched = self.find_match(request, &text).await?;
        self.record(voter_id, &text, matched)
    }

    async fn find_match(&self, request: &ResolveRequest, text: &str) -> Result<Matched, BallotError> {
        if let Some(ballot_ref) = &request.ballot_ref {
            let db = self.db.lock().expect("db mutex poisoned");
            let location = db
                .get_ballot_location_by_ref(ballot_ref)?
                .ok_or_else(|| BallotError::BallotNotFound(ballot_ref.to_string()))?;
            return Ok(Matched::new(location, MatchMethod::ExplicitRef));
        }

        if text.is_empty() {
            let Some(election_id) = request.election_id else {
                return Err(BallotError::AddressMissing);
            };
            let db = self.db.lock().expect("db mutex poisoned");
            let location = db
                .preview_ballot_location_for_election(election_id)?
                .ok_or_else(|| BallotError::BallotNotFound(format!("election {}", election_id)))?;
            return Ok(Matched::new(location, MatchMethod::ElectionPreview));
        }

        match self.geocoder.locate(text).await {
            GeocodeOutcome::Found(address) => self.nearest_match(&address, request.election_id),
            GeocodeOutcome::NotFound => {
                debug!("Geocoder found nothing for '{}', trying text search", text);
                self.text_match(text, request.election_id)
            }
            GeocodeOutcome::QuotaExceeded => Err(BallotError::GeocoderQuotaExceeded),
        }
    }

    fn nearest_match(
        &self,
        address: &GeocodedAddress,
        election_id: Option<i64>,
    ) -> Result<Matched, BallotError> {
        let origin = GeoPoint::new(address.latitude, address.longitude);
        let state = address
            .state_code
            .clone()
            .or_else(|| state_code_from_formatted(&address.formatted_address));
        let radius = self.radius_miles;
        let db = self.db.lock().expect("db mutex poisoned");

        if let Some(election_id) = election_id {
            if let Some(state) = state.as_deref() {
                if let Some(nearby) = db.find_nearest_ballot_location(origin, Some(state), election_id, radius)? {
                    return Ok(Matched::nearby(nearby, address));
                }
                debug!("No {} ballot near voter for election {}, dropping state restriction", state, election_id);
            }
            return match db.find_nearest_ballot_location(origin, None, election_id, radius)? {
                Some(nearby) => Ok(Matched {
                    state_relaxed: state.is_some(),
                    ..Matched::nearby(nearby, address)
                }),
                None => Err(BallotError::NoBallotWithinRadius { radius_miles: radius }),
            };
        }

        let Some(state) = state else {
            return Err(BallotError::NoElectionDataForState("unknown".to_string()));
        };
        let today = self.today();
        let upcoming = db.upcoming_elections_with_ballots(Some(&state), today)?;
        for election in &upcoming {
            debug!("Searching {} ballots for election {}", state, election.election_id);
            if let Some(nearby) = db.find_nearest_ballot_location(origin, Some(&state), election.election_id, radius)? {
                return Ok(Matched::nearby(nearby, address));
            }
        }

        let past = db.last_election_with_ballots(Some(&state), today)?;
        if let Some(election) = &past {
            debug!("Falling back to past election {} for {}", election.election_id, state);
            if let Some(nearby) = db.find_nearest_ballot_location(origin, Some(&state), election.election_id, radius)? {
                return Ok(Matched {
                    election_fallback: true,
                    ..Matched::nearby(nearby, address)
                });
            }
        }

        if upcoming.is_empty() && past.is_none() {
            Err(BallotError::NoElectionDataForState(state))
        } else {
            Err(BallotError::NoBallotWithinRadius { radius_miles: radius })
        }
    }

    /// "City, ST" search by state and city; text without a comma is matched
    /// loosely against stored search text.
    fn text_match(&self, text: &str, election_id: Option<i64>) -> Result<Matched, BallotError> {
        let (state, city, contains) = match parse_city_state(text) {
            Some(cs) => (Some(cs.state_code), cs.city, None),
            None => (None, None, Some(text.to_string())),
        };
        let db = self.db.lock().expect("db mutex poisoned");
        let search = |election_id: i64| TextSearch {
            election_id,
            state_code: state.clone(),
            city: city.clone(),
            contains: contains.clone(),
        };

        if let Some(election_id) = election_id {
            return match db.find_ballot_location_by_text(&search(election_id))? {
                Some(location) => Ok(Matched::new(location, MatchMethod::TextSearch)),
                None => Err(BallotError::GeocoderNoResult(text.to_string())),
            };
        }

        let today = self.today();
        let upcoming = db.upcoming_elections_with_ballots(state.as_deref(), today)?;
        for election in &upcoming {
            if let Some(location) = db.find_ballot_location_by_text(&search(election.election_id))? {
                return Ok(Matched::new(location, MatchMethod::TextSearch));
            }
        }
        let past = db.last_election_with_ballots(state.as_deref(), today)?;
        if let Some(election) = &past {
            if let Some(location) = db.find_ballot_location_by_text(&search(election.election_id))? {
                return Ok(Matched {
                    election_fallback: true,
                    ..Matched::new(location, MatchMethod::TextSearch)
                });
            }
        }

        match state {
            Some(state) if upcoming.is_empty() && past.is_none() => {
                Err(BallotError::NoElectionDataForState(state))
            }
            _ => Err(BallotError::GeocoderNoResult(text.to_string())),
        }
    }

    /// Writes the voter's own location, copies the matched ballot's items
    /// to the voter, touches the match and saves the voter ballot.
    fn record(&self, voter_id: i64, text: &str, matched: Matched) -> Result<Resolution, BallotError> {
        let location = &matched.location;
        let voter_key = LocationKey::Voter(voter_id);
        let substituted = is_substituted(&matched, text);

        let election = {
            let db = self.db.lock().expect("db mutex poisoned");
            let election = db.get_election(location.election_id)?;
            if !text.is_empty() {
                let fields = voter_location_fields(text, &matched, election.as_ref());
                db.get_or_create_ballot_location(&voter_key, location.election_id, &fields)?;
            }
            if location.key != voter_key {
                db.copy_ballot_items(&location.key, &voter_key, location.election_id)?;
            }
            db.touch_ballot_location(&location.we_vote_id)?;
            election
        };

        let original = match &matched.geocoded {
            Some(address) => AddressBreakdown::from(address).or(breakdown_from_text(text)),
            None => breakdown_from_text(text),
        };
        let (substituted_address, substituted_breakdown) = if substituted {
            let nearby = location
                .full_address()
                .unwrap_or_else(|| location.text_for_map_search.clone());
            let breakdown = AddressBreakdown {
                city: location.normalized_city.clone(),
                state: location
                    .normalized_state
                    .clone()
                    .or_else(|| location.state_code.clone()),
                zip: location.normalized_zip.clone(),
            };
            (nearby, breakdown)
        } else {
            (String::new(), AddressBreakdown::default())
        };

        let record = VoterBallotRecord {
            voter_id,
            election_id: location.election_id,
            state_code: location.state_code.clone(),
            election_description: election
                .as_ref()
                .map(|e| e.name.clone())
                .or_else(|| location.election_description.clone()),
            election_date: election
                .as_ref()
                .and_then(Election::date_text)
                .or_else(|| location.election_date.clone()),
            original_text_for_map_search: text.to_string(),
            original,
            substituted_address_nearby: substituted_address,
            substituted: substituted_breakdown,
            is_from_substituted_address: substituted,
            is_from_test_ballot: election.as_ref().is_some_and(|e| e.is_test),
            polling_location_we_vote_id_source: location.key.map_point().map(String::from),
            ballot_location_we_vote_id: Some(location.we_vote_id.clone()),
            ballot_location_display_name: location.display_name.clone(),
            ballot_location_shortcut: location.shortcut.clone(),
        };
        let voter_ballot = self.voter_ballots.save(&record)?;

        debug!(
            "Voter {} resolved to {} via {:?} (substituted: {})",
            voter_id, location.we_vote_id, matched.method, substituted
        );
        Ok(Resolution {
            status: ResolutionStatus::Found,
            match_method: Some(matched.method),
            substituted,
            election_fallback: matched.election_fallback,
            state_relaxed: matched.state_relaxed,
            distance_miles: matched.distance_miles,
            voter_ballot: Some(voter_ballot),
            message: None,
            ballot_location: Some(matched.location),
        })
    }
}

/// Nearest and text matches come from someone else's address unless the
/// stored search text is literally the voter's.
fn is_substituted(matched: &Matched, text: &str) -> bool {
    match matched.method {
        MatchMethod::ExplicitRef | MatchMethod::ElectionPreview => false,
        MatchMethod::Nearest | MatchMethod::TextSearch => {
            matched.location.is_map_point()
                && address_key(&matched.location.text_for_map_search) != address_key(text)
        }
    }
}

fn voter_location_fields(
    text: &str,
    matched: &Matched,
    election: Option<&Election>,
) -> BallotLocationFields {
    let mut fields = BallotLocationFields {
        text_for_map_search: Some(text.to_string()),
        election_description: election.map(|e| e.name.clone()),
        election_date: election.and_then(Election::date_text),
        state_code: matched.location.state_code.clone(),
        ..Default::default()
    };
    if let Some(address) = &matched.geocoded {
        fields.normalized_line1 = address.line1.clone();
        fields.normalized_line2 = address.line2.clone();
        fields.normalized_city = address.city.clone();
        fields.normalized_state = address.state_code.clone();
        fields.normalized_zip = address.zip.clone();
        fields.latitude = Some(address.latitude);
        fields.longitude = Some(address.longitude);
        if address.state_code.is_some() {
            fields.state_code = address.state_code.clone();
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(key: LocationKey, text: &str) -> BallotLocation {
        BallotLocation {
            id: 1,
            we_vote_id: "wv00ballot1".to_string(),
            key,
            election_id: 1,
            election_description: None,
            election_date: None,
            text_for_map_search: text.to_string(),
            normalized_line1: None,
            normalized_line2: None,
            normalized_city: None,
            normalized_state: None,
            normalized_zip: None,
            state_code: Some("MS".to_string()),
            latitude: None,
            longitude: None,
            display_option_on: false,
            display_name: None,
            shortcut: None,
            display_order: 0,
            created_at: String::new(),
            date_last_updated: String::new(),
        }
    }

    #[test]
    fn status_maps_taxonomy() {
        assert_eq!(
            ResolutionStatus::from(&BallotError::AddressMissing),
            ResolutionStatus::AddressMissing
        );
        assert_eq!(
            ResolutionStatus::from(&BallotError::NoBallotWithinRadius { radius_miles: 25.0 }),
            ResolutionStatus::NoBallotWithinRadius
        );
        assert_eq!(
            serde_json::to_string(&ResolutionStatus::GeocoderQuotaExceeded).unwrap(),
            "\"GEOCODER_QUOTA_EXCEEDED\""
        );
    }

    #[test]
    fn substitution_depends_on_text_and_method() {
        let map_point = LocationKey::MapPoint("wv01ploc1".to_string());
        let same = Matched::new(location(map_point.clone(), "Jackson, MS"), MatchMethod::Nearest);
        assert!(!is_substituted(&same, "jackson ,  ms"));

        let other = Matched::new(location(map_point.clone(), "Coldwater, MS"), MatchMethod::TextSearch);
        assert!(is_substituted(&other, "Jackson, MS"));

        let explicit = Matched::new(location(map_point, "Coldwater, MS"), MatchMethod::ExplicitRef);
        assert!(!is_substituted(&explicit, "Jackson, MS"));
    }

    #[test]
    fn failed_resolution_carries_message() {
        let resolution = Resolution::failed(&BallotError::BallotNotFound("wv01ballot9".into()));
        assert_eq!(resolution.status, ResolutionStatus::BallotNotFound);
        assert!(!resolution.is_found());
        assert!(resolution.message.unwrap().contains("wv01ballot9"));
    }
}
