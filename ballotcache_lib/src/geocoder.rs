//! Geocoder adapter: rate limiting, retries, a result cache, and the keyless
//! fallback used when the keyed request runs out of quota.

use std::time::Duration;

use geocoder_api::{Client, Error as GeocoderError, GeocodedAddress};
use rand::Rng;
use tracing::{debug, warn};

use crate::cache::{address_key, MemoryCache};
use crate::config::GeocoderSettings;
use crate::rate_limiter::{RateLimiter, TrackerSummary};

/// What the resolver needs to know about one geocode.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(GeocodedAddress),
    NotFound,
    /// Both the keyed and keyless requests hit the provider's quota.
    QuotaExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn from_settings(settings: &GeocoderSettings) -> Self {
        Self {
            max_retries: settings.retry_max,
            base_delay_ms: settings.retry_base_ms,
            max_delay_ms: settings.retry_max_ms,
        }
    }

    /// No retries; used by tests that script provider failures.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(30) as u32;
        let exp = 1u64 << shift;
        let base = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        Duration::from_millis((base as f64 * jitter) as u64)
    }
}

/// Transport failures and provider hiccups are worth another try. Quota is
/// not: it goes straight to the keyless fallback.
fn is_retryable(err: &GeocoderError) -> bool {
    match err {
        GeocoderError::RequestFailed | GeocoderError::Provider(_) => true,
        GeocoderError::HttpStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

pub struct GeocoderAdapter {
    primary: Client,
    keyless: Client,
    limiter: RateLimiter,
    cache: MemoryCache<GeocodedAddress>,
    retry: RetryConfig,
}

impl GeocoderAdapter {
    pub fn new(primary: Client, limiter: RateLimiter, cache_ttl: Duration, retry: RetryConfig) -> Self {
        let keyless = primary.keyless();
        Self {
            primary,
            keyless,
            limiter,
            cache: MemoryCache::new(cache_ttl),
            retry,
        }
    }

    pub fn from_settings(settings: &GeocoderSettings) -> Result<Self, GeocoderError> {
        let base_url = settings
            .base_url
            .as_deref()
            .unwrap_or(geocoder_api::DEFAULT_BASE_URL);
        let client = Client::with_timeout(base_url, settings.api_key.clone(), settings.timeout())?;
        if !client.has_api_key() {
            warn!("No geocoder API key configured; requests will be keyless");
        }
        Ok(Self::new(
            client,
            RateLimiter::new(settings.max_requests, settings.window()),
            settings.cache_ttl(),
            RetryConfig::from_settings(settings),
        ))
    }

    /// Geocodes free text. Never fails: provider errors degrade to
    /// `NotFound`, and quota exhaustion on both paths to `QuotaExceeded`.
    pub async fn locate(&self, text: &str) -> GeocodeOutcome {
        let key = address_key(text);
        if key.is_empty() {
            return GeocodeOutcome::NotFound;
        }
        if let Some(hit) = self.cache.get(&key) {
            self.limiter.tracker().record_cache_hit();
            return GeocodeOutcome::Found(hit);
        }

        let address = text.trim();
        let keyed_err = match self.keyed_with_retry(address).await {
            Ok(found) => return self.finish(key, found),
            Err(err) => err,
        };

        let tracker = self.limiter.tracker();
        if keyed_err.is_quota_exceeded() {
            tracker.record_quota_exceeded();
            warn!("Geocoder quota exceeded for '{}', retrying without key", address);
        } else {
            tracker.record_failure();
            warn!("Geocoder failed for '{}' ({}), retrying without key", address, keyed_err);
        }
        tracker.record_keyless_fallback();

        self.limiter.acquire().await;
        match self.keyless.geocode(address).await {
            Ok(found) => self.finish(key, found),
            Err(err) if err.is_quota_exceeded() => {
                tracker.record_quota_exceeded();
                warn!("Keyless geocode also over quota for '{}'", address);
                GeocodeOutcome::QuotaExceeded
            }
            Err(err) => {
                tracker.record_failure();
                warn!("Keyless geocode failed for '{}': {}", address, err);
                GeocodeOutcome::NotFound
            }
        }
    }

    async fn keyed_with_retry(&self, address: &str) -> Result<Option<GeocodedAddress>, GeocoderError> {
        let mut attempt = 0usize;
        loop {
            self.limiter.acquire().await;
            match self.primary.geocode(address).await {
                Ok(found) => return Ok(found),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.retry.max_retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    self.limiter.tracker().record_failure();
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "geocode request failed (attempt {}/{}), retrying in {:.1}s",
                        attempt,
                        self.retry.max_retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn finish(&self, key: String, found: Option<GeocodedAddress>) -> GeocodeOutcome {
        let tracker = self.limiter.tracker();
        match found {
            Some(address) => {
                tracker.record_found();
                debug!(
                    "Geocoded '{}' to ({}, {})",
                    key, address.latitude, address.longitude
                );
                self.cache.set(key, address.clone());
                GeocodeOutcome::Found(address)
            }
            None => {
                tracker.record_not_found();
                GeocodeOutcome::NotFound
            }
        }
    }

    pub fn stats(&self) -> TrackerSummary {
        self.limiter.tracker().summary()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        let cfg = RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        let first = cfg.delay_for_attempt(1).as_millis();
        assert!((80..=120).contains(&first));
        let third = cfg.delay_for_attempt(3).as_millis();
        assert!((320..=480).contains(&third));
        let capped = cfg.delay_for_attempt(20).as_millis();
        assert!(capped <= 1200);
    }

    #[test]
    fn retryable_errors() {
        assert!(is_retryable(&GeocoderError::RequestFailed));
        assert!(is_retryable(&GeocoderError::HttpStatus {
            status: 503,
            body: String::new()
        }));
        assert!(!is_retryable(&GeocoderError::HttpStatus {
            status: 404,
            body: String::new()
        }));
        assert!(!is_retryable(&GeocoderError::QuotaExceeded));
        assert!(!is_retryable(&GeocoderError::RequestDenied("bad key".into())));
    }

    #[test]
    fn from_settings_uses_overrides() {
        let settings = GeocoderSettings {
            api_key: Some("k".to_string()),
            base_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        };
        let adapter = GeocoderAdapter::from_settings(&settings).unwrap();
        assert_eq!(adapter.stats().requests_made, 0);
        assert_eq!(adapter.cached_entries(), 0);
    }

    #[tokio::test]
    async fn blank_text_is_not_found_without_a_request() {
        let adapter = GeocoderAdapter::from_settings(&GeocoderSettings {
            base_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(adapter.locate("   ").await, GeocodeOutcome::NotFound);
        assert_eq!(adapter.stats().requests_made, 0);
    }
}
