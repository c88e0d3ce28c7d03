//! Query builder for the geocode endpoint.

use url::Url;

/// Parameters for a single forward-geocoding request.
///
/// The API key is not part of the query; [`crate::Client`] appends it so
/// the same query can be replayed through the keyless path.
#[derive(Clone, Debug, Default)]
pub struct GeocodeQuery {
    address: String,
    region: Option<String>,
    components: Vec<(String, String)>,
    language: Option<String>,
}

impl GeocodeQuery {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Biases results toward a ccTLD region (e.g. `us`).
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    /// Restricts results to a component, e.g. `("country", "US")` or
    /// `("administrative_area", "MS")`. Repeated calls are joined with `|`.
    pub fn with_component(mut self, key: &str, value: &str) -> Self {
        self.components.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Appends this query's parameters to the given URL, returning the modified URL.
    pub fn add_to_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("address", &self.address);
        if let Some(region) = &self.region {
            url.query_pairs_mut().append_pair("region", region);
        }
        if !self.components.is_empty() {
            let joined = self
                .components
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join("|");
            url.query_pairs_mut().append_pair("components", &joined);
        }
        if let Some(language) = &self.language {
            url.query_pairs_mut().append_pair("language", language);
        }
        url
    }
}
