use anyhow::Result;
use ballotcache_lib::{BallotEntry, BallotLocation, Resolution, VoterBallot};
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Tabled, Serialize)]
pub struct LocationRow {
    #[tabled(rename = "Ballot")]
    #[serde(rename = "Ballot")]
    we_vote_id: String,
    #[tabled(rename = "Key")]
    #[serde(rename = "Key")]
    key: String,
    #[tabled(rename = "Election")]
    #[serde(rename = "Election")]
    election_id: i64,
    #[tabled(rename = "State")]
    #[serde(rename = "State")]
    state: String,
    #[tabled(rename = "Address")]
    #[serde(rename = "Address")]
    address: String,
    #[tabled(rename = "Shortcut")]
    #[serde(rename = "Shortcut")]
    shortcut: String,
    #[tabled(rename = "Coordinates")]
    #[serde(rename = "Coordinates")]
    coordinates: String,
    #[tabled(rename = "Updated")]
    #[serde(rename = "Updated")]
    updated: String,
}

#[derive(Tabled, Serialize)]
pub struct ItemRow {
    #[tabled(rename = "Order")]
    #[serde(rename = "Order")]
    order: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    kind: String,
    #[tabled(rename = "Name")]
    #[serde(rename = "Name")]
    name: String,
    #[tabled(rename = "Ref")]
    #[serde(rename = "Ref")]
    we_vote_id: String,
    #[tabled(rename = "Subtitle")]
    #[serde(rename = "Subtitle")]
    subtitle: String,
}

#[derive(Tabled, Serialize)]
pub struct VoterBallotRow {
    #[tabled(rename = "Voter")]
    #[serde(rename = "Voter")]
    voter_id: i64,
    #[tabled(rename = "Election")]
    #[serde(rename = "Election")]
    election: String,
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    date: String,
    #[tabled(rename = "Ballot")]
    #[serde(rename = "Ballot")]
    ballot: String,
    #[tabled(rename = "Address")]
    #[serde(rename = "Address")]
    address: String,
    #[tabled(rename = "Substituted")]
    #[serde(rename = "Substituted")]
    substituted: String,
    #[tabled(rename = "Caveat")]
    #[serde(rename = "Caveat")]
    caveat: String,
}

#[derive(Tabled, Serialize)]
pub struct ResolutionRow {
    #[tabled(rename = "Status")]
    #[serde(rename = "Status")]
    status: String,
    #[tabled(rename = "Ballot")]
    #[serde(rename = "Ballot")]
    ballot: String,
    #[tabled(rename = "Election")]
    #[serde(rename = "Election")]
    election: String,
    #[tabled(rename = "Method")]
    #[serde(rename = "Method")]
    method: String,
    #[tabled(rename = "Distance")]
    #[serde(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Substituted")]
    #[serde(rename = "Substituted")]
    substituted: bool,
    #[tabled(rename = "Past Election")]
    #[serde(rename = "Past Election")]
    election_fallback: bool,
    #[tabled(rename = "Message")]
    #[serde(rename = "Message")]
    message: String,
}

/// Two-column rows for job summaries.
#[derive(Tabled, Serialize)]
pub struct SummaryRow {
    #[tabled(rename = "Field")]
    #[serde(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    #[serde(rename = "Value")]
    value: String,
}

// -- Row builders --

pub fn build_location_rows(locations: &[BallotLocation]) -> Vec<LocationRow> {
    locations
        .iter()
        .map(|l| LocationRow {
            we_vote_id: l.we_vote_id.clone(),
            key: l.key.to_string(),
            election_id: l.election_id,
            state: l.state_code.clone().unwrap_or_default(),
            address: l.full_address().unwrap_or_else(|| l.text_for_map_search.clone()),
            shortcut: l.shortcut.clone().unwrap_or_default(),
            coordinates: l
                .point()
                .map(|p| format!("{:.4}, {:.4}", p.latitude, p.longitude))
                .unwrap_or_default(),
            updated: l.date_last_updated.clone(),
        })
        .collect()
}

pub fn build_item_rows(items: &[BallotEntry]) -> Vec<ItemRow> {
    items
        .iter()
        .map(|i| ItemRow {
            order: i
                .local_ballot_order
                .or(i.google_ballot_placement)
                .map(|o| o.to_string())
                .unwrap_or_default(),
            kind: i.subject.kind().to_string(),
            name: i.display_name.clone(),
            we_vote_id: i.subject.we_vote_id().to_string(),
            subtitle: i.measure_subtitle.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn build_voter_ballot_rows(ballots: &[VoterBallot]) -> Vec<VoterBallotRow> {
    ballots
        .iter()
        .map(|b| VoterBallotRow {
            voter_id: b.voter_id,
            election: b
                .election_description
                .clone()
                .unwrap_or_else(|| b.election_id.to_string()),
            date: b.election_date.clone().unwrap_or_default(),
            ballot: b.ballot_location_we_vote_id.clone().unwrap_or_default(),
            address: b.original_text_for_map_search.clone(),
            substituted: if b.is_from_substituted_address {
                b.substituted_address_nearby.clone()
            } else {
                String::new()
            },
            caveat: b.ballot_caveat(),
        })
        .collect()
}

pub fn build_resolution_row(resolution: &Resolution) -> ResolutionRow {
    let location = resolution.ballot_location.as_ref();
    ResolutionRow {
        status: serde_json::to_value(resolution.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default(),
        ballot: location.map(|l| l.we_vote_id.clone()).unwrap_or_default(),
        election: location
            .map(|l| l.election_id.to_string())
            .unwrap_or_default(),
        method: resolution
            .match_method
            .map(|m| format!("{:?}", m))
            .unwrap_or_default(),
        distance: resolution
            .distance_miles
            .map(|d| format!("{:.1} mi", d))
            .unwrap_or_default(),
        substituted: resolution.substituted,
        election_fallback: resolution.election_fallback,
        message: resolution.message.clone().unwrap_or_default(),
    }
}

/// Flattens any serializable summary struct into field/value rows.
pub fn build_summary_rows<T: Serialize>(summary: &T) -> Vec<SummaryRow> {
    let value = serde_json::to_value(summary).unwrap_or_default();
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(field, value)| SummaryRow {
                field,
                value: match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Array(items) => items
                        .iter()
                        .map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string()))
                        .collect::<Vec<_>>()
                        .join(", "),
                    other => other.to_string(),
                },
            })
            .collect(),
        _ => Vec::new(),
    }
}

// -- Printing --

/// Prints rows in the requested format. JSON prints `data`, which keeps
/// every field; table and CSV print the flattened rows.
pub fn print_rows<R, D>(rows: Vec<R>, data: &D, format: &OutputFormat) -> Result<()>
where
    R: Tabled + Serialize,
    D: Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => println!("{}", Table::new(rows)),
        OutputFormat::Json => print_json(data),
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

pub fn print_json<T: Serialize + ?Sized>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}
