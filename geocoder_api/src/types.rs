//! Response types for the geocode endpoint, plus the flattened
//! [`GeocodedAddress`] the rest of the workspace consumes.

use serde::{Deserialize, Serialize};

/// Top-level `status` field of a geocode response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeocodeStatus {
    Ok,
    ZeroResults,
    OverDailyLimit,
    OverQueryLimit,
    RequestDenied,
    InvalidRequest,
    #[serde(other)]
    UnknownError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResponse {
    pub status: GeocodeStatus,
    #[serde(default)]
    pub results: Vec<GeocodeResult>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResult {
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    pub formatted_address: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub partial_match: bool,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
    #[serde(default)]
    pub location_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A geocoded address with the components we care about pulled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    pub latitude: f64,
    pub longitude: f64,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    /// Two-letter state code from `administrative_area_level_1`.
    pub state_code: Option<String>,
    pub zip: Option<String>,
    pub formatted_address: String,
    pub partial_match: bool,
    pub components: Vec<AddressComponent>,
}

impl GeocodeResult {
    fn component(&self, kind: &str) -> Option<&AddressComponent> {
        self.address_components
            .iter()
            .find(|c| c.types.iter().any(|t| t == kind))
    }
}

impl From<&GeocodeResult> for GeocodedAddress {
    fn from(result: &GeocodeResult) -> Self {
        let street_number = result.component("street_number").map(|c| c.long_name.as_str());
        let route = result.component("route").map(|c| c.long_name.as_str());
        let line1 = match (street_number, route) {
            (Some(n), Some(r)) => Some(format!("{} {}", n, r)),
            (None, Some(r)) => Some(r.to_string()),
            (Some(n), None) => Some(n.to_string()),
            (None, None) => None,
        };

        let city = ["locality", "postal_town", "sublocality", "administrative_area_level_3"]
            .iter()
            .find_map(|kind| result.component(kind))
            .map(|c| c.long_name.clone());

        let zip = result.component("postal_code").map(|c| {
            match result.component("postal_code_suffix") {
                Some(suffix) => format!("{}-{}", c.long_name, suffix.long_name),
                None => c.long_name.clone(),
            }
        });

        Self {
            latitude: result.geometry.location.lat,
            longitude: result.geometry.location.lng,
            line1,
            line2: result.component("subpremise").map(|c| c.long_name.clone()),
            city,
            state_code: result
                .component("administrative_area_level_1")
                .map(|c| c.short_name.to_uppercase()),
            zip,
            formatted_address: result.formatted_address.clone(),
            partial_match: result.partial_match,
            components: result.address_components.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(long: &str, short: &str, kind: &str) -> AddressComponent {
        AddressComponent {
            long_name: long.to_string(),
            short_name: short.to_string(),
            types: vec![kind.to_string()],
        }
    }

    fn result_with(components: Vec<AddressComponent>) -> GeocodeResult {
        GeocodeResult {
            address_components: components,
            formatted_address: "formatted".to_string(),
            geometry: Geometry {
                location: LatLng { lat: 1.5, lng: -2.5 },
                location_type: None,
            },
            place_id: None,
            partial_match: false,
            types: vec![],
        }
    }

    #[test]
    fn flattens_street_city_state_zip() {
        let result = result_with(vec![
            component("1200", "1200", "street_number"),
            component("Broadway", "Broadway", "route"),
            component("Suite 4", "Suite 4", "subpremise"),
            component("Oakland", "Oakland", "locality"),
            component("California", "ca", "administrative_area_level_1"),
            component("94612", "94612", "postal_code"),
            component("1203", "1203", "postal_code_suffix"),
        ]);
        let address = GeocodedAddress::from(&result);
        assert_eq!(address.line1.as_deref(), Some("1200 Broadway"));
        assert_eq!(address.line2.as_deref(), Some("Suite 4"));
        assert_eq!(address.city.as_deref(), Some("Oakland"));
        assert_eq!(address.state_code.as_deref(), Some("CA"));
        assert_eq!(address.zip.as_deref(), Some("94612-1203"));
        assert_eq!(address.latitude, 1.5);
        assert_eq!(address.longitude, -2.5);
    }

    #[test]
    fn city_falls_back_to_postal_town() {
        let result = result_with(vec![component("Springfield", "Springfield", "postal_town")]);
        let address = GeocodedAddress::from(&result);
        assert_eq!(address.city.as_deref(), Some("Springfield"));
        assert!(address.line1.is_none());
        assert!(address.state_code.is_none());
    }

    #[test]
    fn unknown_status_maps_to_unknown_error() {
        let resp: GeocodeResponse =
            serde_json::from_str(r#"{"status":"SOMETHING_NEW","results":[]}"#).unwrap();
        assert_eq!(resp.status, GeocodeStatus::UnknownError);
    }
}
