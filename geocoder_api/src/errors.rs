//! Error types for the geocoding client.

/// Errors that can occur when calling the geocoding provider.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP request itself failed (network error, timeout, client build).
    #[error("Request failed")]
    RequestFailed,
    /// The provider returned a non-success HTTP status with a body snippet.
    #[error("Request failed with status {status}")]
    HttpStatus { status: u16, body: String },
    /// Daily or per-second quota exhausted (HTTP 429, `OVER_QUERY_LIMIT`, `OVER_DAILY_LIMIT`).
    #[error("Geocoder quota exceeded")]
    QuotaExceeded,
    /// The provider refused the request, usually a bad or restricted key.
    #[error("Request denied: {0}")]
    RequestDenied(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),
    /// `UNKNOWN_ERROR` or an unrecognised status; the provider suggests retrying.
    #[error("Provider error: {0}")]
    Provider(String),
}

impl Error {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Error::QuotaExceeded)
    }
}
