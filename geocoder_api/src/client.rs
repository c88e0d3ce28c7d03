//! HTTP client for the Google-compatible geocode endpoint.

use std::time::Duration;

use url::Url;

use crate::{
    query::GeocodeQuery,
    types::{GeocodeResponse, GeocodeStatus, GeocodedAddress},
    Error,
};

pub const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com";
const GEOCODE_PATH: &str = "/maps/api/geocode/json";

/// Request timeout used when the caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Geocoding client. Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Client {
    /// Creates a client pointing at the production provider.
    pub fn new(api_key: Option<String>) -> Result<Self, Error> {
        Self::with_timeout(DEFAULT_BASE_URL, api_key, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom base URL. Used for testing with wiremock.
    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self, Error> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                Error::RequestFailed
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Same endpoint and connection pool, no API key.
    pub fn keyless(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: None,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn get_url(&self, query: &GeocodeQuery) -> Result<Url, Error> {
        let url = Url::parse(format!("{}{}", self.base_url, GEOCODE_PATH).as_str()).map_err(|e| {
            tracing::error!("Invalid URL constructed: {}", e);
            Error::RequestFailed
        })?;
        let mut url = query.add_to_url(&url);
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    /// Sends the query and returns the raw response once the body status
    /// has been checked. `ZERO_RESULTS` is returned as `Ok` with no results.
    pub async fn geocode_raw(&self, query: &GeocodeQuery) -> Result<GeocodeResponse, Error> {
        let url = self.get_url(query)?;
        let resp = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Geocode request failed: {}", e);
                Error::RequestFailed
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::QuotaExceeded);
        }

        let body = resp.text().await.map_err(|e| {
            tracing::error!("Failed to read response body: {}", e);
            Error::RequestFailed
        })?;

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::RequestDenied(truncate_body(&body)));
        }
        if !status.is_success() {
            let snippet = truncate_body(&body);
            tracing::error!("Geocode failed with status {}: {}", status, snippet);
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let parsed = serde_json::from_str::<GeocodeResponse>(&body).map_err(|e| {
            let snippet = truncate_body(&body);
            tracing::error!("Failed to parse geocode response: {} | body: {}", e, snippet);
            Error::ParseFailed(e.to_string())
        })?;

        let message = parsed.error_message.clone().unwrap_or_default();
        match parsed.status {
            GeocodeStatus::Ok | GeocodeStatus::ZeroResults => Ok(parsed),
            GeocodeStatus::OverQueryLimit | GeocodeStatus::OverDailyLimit => {
                tracing::warn!("Geocoder quota exceeded: {}", message);
                Err(Error::QuotaExceeded)
            }
            GeocodeStatus::RequestDenied => Err(Error::RequestDenied(message)),
            GeocodeStatus::InvalidRequest => Err(Error::InvalidRequest(message)),
            GeocodeStatus::UnknownError => Err(Error::Provider(message)),
        }
    }

    /// Geocodes free text, returning the first result or `None` when the
    /// provider has no match.
    pub async fn geocode(&self, address: &str) -> Result<Option<GeocodedAddress>, Error> {
        let resp = self.geocode_raw(&GeocodeQuery::new(address)).await?;
        Ok(resp.results.first().map(GeocodedAddress::from))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}
