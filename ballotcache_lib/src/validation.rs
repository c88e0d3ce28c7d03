//! Input validation for identifiers and free text handed to the engine.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::BallotError;

/// Longest address text accepted for geocoding.
pub const MAX_ADDRESS_LENGTH: usize = 255;
pub const MAX_SHORTCUT_LENGTH: usize = 100;
pub const MAX_WE_VOTE_ID_LENGTH: usize = 64;

pub const VALID_STATES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC", "AS", "GU", "MP", "PR", "VI",
];

/// `wv{site}ballot{n}`, lowercase.
pub fn is_ballot_we_vote_id(id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^wv[0-9a-z]*ballot[0-9]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(id))
}

pub fn is_valid_state(code: &str) -> bool {
    VALID_STATES.contains(&code)
}

/// Strip ASCII control characters (0x00-0x1F except space 0x20), trim whitespace,
/// and enforce a byte-length limit. Empty results are allowed; callers decide
/// whether empty means "missing".
pub fn sanitize_text(input: &str, max_len: usize) -> Result<String, BallotError> {
    if input.len() > max_len {
        return Err(BallotError::InvalidInput(format!(
            "input exceeds maximum length of {} bytes",
            max_len
        )));
    }
    Ok(input
        .chars()
        .filter(|c| !c.is_ascii_control() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string())
}

/// Address text as typed by the voter. May be empty.
pub fn validate_address_text(input: &str) -> Result<String, BallotError> {
    sanitize_text(input, MAX_ADDRESS_LENGTH)
}

/// Validate a US state code: uppercase, check against known states + territories.
pub fn validate_state(input: &str) -> Result<String, BallotError> {
    let upper = input.trim().to_uppercase();
    if is_valid_state(&upper) {
        Ok(upper)
    } else {
        Err(BallotError::InvalidInput(format!(
            "unknown state code '{}'. Valid codes: AL, AK, AZ, ... DC, PR, VI (50 states + DC + territories)",
            input
        )))
    }
}

/// Public shortcuts are stored trimmed and lowercased; only URL-safe characters.
pub fn validate_shortcut(input: &str) -> Result<String, BallotError> {
    let shortcut = sanitize_text(input, MAX_SHORTCUT_LENGTH)?.to_lowercase();
    if shortcut.is_empty() {
        return Err(BallotError::InvalidInput("shortcut is empty".to_string()));
    }
    if !shortcut
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BallotError::InvalidInput(format!(
            "shortcut '{}' may only contain letters, digits, '-' and '_'",
            shortcut
        )));
    }
    Ok(shortcut)
}

/// Permanent ballot ids look like `wv01ballot123`.
pub fn validate_ballot_we_vote_id(input: &str) -> Result<String, BallotError> {
    let id = sanitize_text(input, MAX_WE_VOTE_ID_LENGTH)?.to_lowercase();
    if !is_ballot_we_vote_id(&id) {
        return Err(BallotError::InvalidInput(format!(
            "'{}' is not a ballot id (expected e.g. wv01ballot123)",
            input
        )));
    }
    Ok(id)
}

pub fn validate_voter_id(voter_id: i64) -> Result<i64, BallotError> {
    if voter_id <= 0 {
        return Err(BallotError::InvalidInput(format!(
            "voter id must be positive, got {}",
            voter_id
        )));
    }
    Ok(voter_id)
}

pub fn validate_election_id(election_id: i64) -> Result<i64, BallotError> {
    if election_id <= 0 {
        return Err(BallotError::InvalidInput(format!(
            "election id must be positive, got {}",
            election_id
        )));
    }
    Ok(election_id)
}

/// Validate a YYYY-MM-DD date string.
pub fn validate_date(input: &str) -> Result<NaiveDate, BallotError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| {
        BallotError::InvalidInput(format!(
            "invalid date '{}'. Expected format: YYYY-MM-DD (e.g., 2024-06-01)",
            trimmed
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- State validation --

    #[test]
    fn state_valid_lowercase() {
        assert_eq!(validate_state("ms").unwrap(), "MS");
    }

    #[test]
    fn state_valid_territory() {
        assert_eq!(validate_state("pr").unwrap(), "PR");
        assert_eq!(validate_state(" DC ").unwrap(), "DC");
    }

    #[test]
    fn state_invalid() {
        assert!(validate_state("XX").is_err());
        assert!(validate_state("").is_err());
        assert!(validate_state("MISSISSIPPI").is_err());
    }

    // -- Address text --

    #[test]
    fn address_strips_control_chars() {
        assert_eq!(
            validate_address_text("  Jackson,\tMS\n").unwrap(),
            "Jackson,MS"
        );
    }

    #[test]
    fn address_may_be_empty() {
        assert_eq!(validate_address_text("   ").unwrap(), "");
    }

    #[test]
    fn address_too_long() {
        let long = "a".repeat(MAX_ADDRESS_LENGTH + 1);
        assert!(validate_address_text(&long).is_err());
    }

    // -- Shortcuts and ids --

    #[test]
    fn shortcut_lowercased() {
        assert_eq!(validate_shortcut(" Oakland-Downtown ").unwrap(), "oakland-downtown");
    }

    #[test]
    fn shortcut_rejects_spaces_and_empty() {
        assert!(validate_shortcut("two words").is_err());
        assert!(validate_shortcut("  ").is_err());
    }

    #[test]
    fn ballot_we_vote_id_shape() {
        assert_eq!(validate_ballot_we_vote_id("WV01BALLOT12").unwrap(), "wv01ballot12");
        assert!(validate_ballot_we_vote_id("wv01ploc42284").is_err());
        assert!(validate_ballot_we_vote_id("wv-ballot-night").is_err());
        assert!(validate_ballot_we_vote_id("wv01ballot").is_err());
    }

    #[test]
    fn ids_must_be_positive() {
        assert!(validate_voter_id(0).is_err());
        assert_eq!(validate_voter_id(5).unwrap(), 5);
        assert!(validate_election_id(-1).is_err());
        assert_eq!(validate_election_id(4184).unwrap(), 4184);
    }

    #[test]
    fn date_format() {
        assert_eq!(
            validate_date("2024-11-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 11, 5).unwrap()
        );
        assert!(validate_date("11/05/2024").is_err());
    }
}
