//! Address heuristics: pull a state code, city and zip out of free text.
//!
//! These only run when the geocoder gives us nothing, or to fill in the
//! city/state/zip breakdown stored on voter ballots. State names are read from
//! `seed_data/us_states.yml` at compile time.

use std::collections::HashMap;
use std::sync::OnceLock;

use geocoder_api::GeocodedAddress;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::is_valid_state;

#[derive(Error, Debug)]
pub enum StateNameError {
    #[error("Failed to parse state name YAML: {0}")]
    YamlParse(#[from] serde_yml::Error),
    #[error("Unknown state code in state name file: {0}")]
    UnknownCode(String),
}

#[derive(Deserialize, Debug)]
pub struct StateNameFile {
    pub states: Vec<StateName>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StateName {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Parse state names from YAML content into a lowercase-name -> code map.
pub fn parse_state_names(yaml_content: &str) -> Result<HashMap<String, String>, StateNameError> {
    let file: StateNameFile = serde_yml::from_str(yaml_content)?;
    let mut map = HashMap::new();
    for state in file.states {
        let code = state.code.trim().to_uppercase();
        if !is_valid_state(&code) {
            return Err(StateNameError::UnknownCode(state.code));
        }
        map.insert(fold(&state.name), code.clone());
        for alias in state.aliases {
            map.insert(fold(&alias), code.clone());
        }
    }
    Ok(map)
}

fn state_names() -> &'static HashMap<String, String> {
    static NAMES: OnceLock<HashMap<String, String>> = OnceLock::new();
    NAMES.get_or_init(|| {
        parse_state_names(include_str!("../../seed_data/us_states.yml")).unwrap_or_else(|e| {
            tracing::error!("state name table unusable, full names will not resolve: {}", e);
            HashMap::new()
        })
    })
}

fn zip_regex() -> Option<&'static Regex> {
    static ZIP: OnceLock<Option<Regex>> = OnceLock::new();
    ZIP.get_or_init(|| Regex::new(r"\b(\d{5})(?:-(\d{4}))?\b").ok())
        .as_ref()
}

fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}

/// City, state and zip for one address. Any part may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBreakdown {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl AddressBreakdown {
    pub fn is_complete(&self) -> bool {
        self.city.is_some() && self.state.is_some() && self.zip.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.zip.is_none()
    }

    /// Fills any unknown part from `other`.
    pub fn or(self, other: AddressBreakdown) -> AddressBreakdown {
        AddressBreakdown {
            city: self.city.or(other.city),
            state: self.state.or(other.state),
            zip: self.zip.or(other.zip),
        }
    }
}

impl From<&GeocodedAddress> for AddressBreakdown {
    fn from(address: &GeocodedAddress) -> Self {
        Self {
            city: address.city.clone(),
            state: address
                .state_code
                .clone()
                .or_else(|| state_code_from_formatted(&address.formatted_address)),
            zip: address.zip.clone(),
        }
    }
}

/// Result of splitting "City, ST" style text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityState {
    /// Lowercased city, if a segment precedes the state.
    pub city: Option<String>,
    pub state_code: String,
}

/// Maps a state token ("ms", "Mississippi", "MS 39201") to its 2-letter code.
pub fn normalize_state_code(token: &str) -> Option<String> {
    let without_zip = match zip_regex() {
        Some(re) => re.replace_all(token, "").to_string(),
        None => token.to_string(),
    };
    let cleaned = without_zip.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() {
        return None;
    }
    let upper = cleaned.to_uppercase();
    if upper.len() == 2 && is_valid_state(&upper) {
        return Some(upper);
    }
    state_names().get(&fold(cleaned)).cloned()
}

fn is_country_segment(segment: &str) -> bool {
    matches!(
        fold(segment).as_str(),
        "usa" | "us" | "u.s.a" | "u.s" | "united states" | "united states of america"
    )
}

fn segments(text: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.last().is_some_and(|last| is_country_segment(last)) {
        parts.pop();
    }
    parts
}

/// Parses "City, ST": the last comma segment is the state and the one before
/// it, if any, is the city. Returns `None` when there is no comma or the last
/// segment is not a recognizable state.
pub fn parse_city_state(text: &str) -> Option<CityState> {
    if !text.contains(',') {
        return None;
    }
    let parts = segments(text);
    let (last, rest) = parts.split_last()?;

    if let Some(state_code) = normalize_state_code(last) {
        return Some(CityState {
            city: rest.last().map(|c| c.to_lowercase()),
            state_code,
        });
    }

    // "Street, City ST" with the state glued onto the city segment.
    let (city, state) = last.rsplit_once(' ')?;
    let state_code = normalize_state_code(state)?;
    Some(CityState {
        city: Some(city.trim().to_lowercase()).filter(|c| !c.is_empty()),
        state_code,
    })
}

/// State code from a geocoder formatted address such as
/// `"1200 Broadway, Oakland, CA 94612, USA"`, read from the second-to-last
/// comma segment. Full state names are recognized; the first two letters
/// of the segment are the last resort.
pub fn state_code_from_formatted(formatted: &str) -> Option<String> {
    let parts: Vec<&str> = formatted.split(", ").collect();
    if parts.len() < 2 {
        return None;
    }
    let segment = parts[parts.len() - 2];
    if let Some(code) = normalize_state_code(segment) {
        return Some(code);
    }
    let candidate: String = segment.trim().chars().take(2).collect();
    let upper = candidate.to_uppercase();
    if is_valid_state(&upper) {
        Some(upper)
    } else {
        None
    }
}

/// Best-effort city/state/zip from free text, without calling the geocoder.
pub fn breakdown_from_text(text: &str) -> AddressBreakdown {
    let zip = zip_regex().and_then(|re| {
        re.captures_iter(text).last().map(|cap| match cap.get(2) {
            Some(plus4) => format!("{}-{}", &cap[1], plus4.as_str()),
            None => cap[1].to_string(),
        })
    });

    match parse_city_state(text) {
        Some(cs) => AddressBreakdown {
            city: cs.city.filter(|c| !c.chars().any(|ch| ch.is_ascii_digit())),
            state: Some(cs.state_code),
            zip,
        },
        None => AddressBreakdown {
            city: None,
            state: None,
            zip,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table_loads() {
        let names = state_names();
        assert_eq!(names.get("mississippi").map(String::as_str), Some("MS"));
        assert_eq!(names.get("new york").map(String::as_str), Some("NY"));
        assert_eq!(names.get("washington dc").map(String::as_str), Some("DC"));
        assert_eq!(names.len(), 59);
    }

    #[test]
    fn test_parse_rejects_unknown_code() {
        let yaml = r#"
states:
  - name: "Atlantis"
    code: "AX"
"#;
        assert!(matches!(
            parse_state_names(yaml),
            Err(StateNameError::UnknownCode(_))
        ));
    }

    #[test]
    fn test_normalize_state_code() {
        assert_eq!(normalize_state_code("ms").as_deref(), Some("MS"));
        assert_eq!(normalize_state_code(" CA 94612").as_deref(), Some("CA"));
        assert_eq!(normalize_state_code("Mississippi").as_deref(), Some("MS"));
        assert_eq!(normalize_state_code("north  carolina").as_deref(), Some("NC"));
        assert_eq!(normalize_state_code("ZZ"), None);
        assert_eq!(normalize_state_code(""), None);
    }

    #[test]
    fn test_parse_city_state() {
        let cs = parse_city_state("Sunnyvale, CA").unwrap();
        assert_eq!(cs.city.as_deref(), Some("sunnyvale"));
        assert_eq!(cs.state_code, "CA");

        let cs = parse_city_state("Jackson, Mississippi, USA").unwrap();
        assert_eq!(cs.city.as_deref(), Some("jackson"));
        assert_eq!(cs.state_code, "MS");

        let cs = parse_city_state("1200 Broadway, Oakland CA").unwrap();
        assert_eq!(cs.city.as_deref(), Some("oakland"));
        assert_eq!(cs.state_code, "CA");
    }

    #[test]
    fn test_parse_city_state_needs_comma() {
        assert!(parse_city_state("Oakland CA").is_none());
        assert!(parse_city_state("Oakland, Narnia").is_none());
    }

    #[test]
    fn test_state_code_from_formatted() {
        assert_eq!(
            state_code_from_formatted("1200 Broadway, Oakland, CA 94612, USA").as_deref(),
            Some("CA")
        );
        assert_eq!(
            state_code_from_formatted("Jackson, MS, USA").as_deref(),
            Some("MS")
        );
        assert_eq!(state_code_from_formatted("Somewhere"), None);
        assert_eq!(
            state_code_from_formatted("Jackson, Mississippi, USA").as_deref(),
            Some("MS")
        );
        assert_eq!(
            state_code_from_formatted("Portland, Maine 04101, USA").as_deref(),
            Some("ME")
        );
    }

    #[test]
    fn test_breakdown_from_text() {
        let b = breakdown_from_text("1200 Broadway, Oakland, CA 94612-1203");
        assert_eq!(b.city.as_deref(), Some("oakland"));
        assert_eq!(b.state.as_deref(), Some("CA"));
        assert_eq!(b.zip.as_deref(), Some("94612-1203"));
        assert!(b.is_complete());

        let b = breakdown_from_text("38618");
        assert_eq!(b.zip.as_deref(), Some("38618"));
        assert!(b.city.is_none() && b.state.is_none());
    }

    #[test]
    fn test_breakdown_or_fills_gaps() {
        let partial = AddressBreakdown {
            city: None,
            state: Some("MS".to_string()),
            zip: None,
        };
        let other = AddressBreakdown {
            city: Some("jackson".to_string()),
            state: Some("AL".to_string()),
            zip: Some("39204".to_string()),
        };
        let merged = partial.or(other);
        assert_eq!(merged.state.as_deref(), Some("MS"));
        assert_eq!(merged.city.as_deref(), Some("jackson"));
        assert!(merged.is_complete());
    }
}
