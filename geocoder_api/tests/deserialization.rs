use geocoder_api::types::GeocodeResponse;
use geocoder_api::{GeocodeStatus, GeocodedAddress};

fn load_fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

#[test]
fn deserialize_street_address() {
    let json = load_fixture("geocode_oakland.json");
    let resp: GeocodeResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(resp.status, GeocodeStatus::Ok);
    assert_eq!(resp.results.len(), 1);

    let result = &resp.results[0];
    assert_eq!(result.address_components.len(), 8);
    assert_eq!(result.geometry.location_type.as_deref(), Some("ROOFTOP"));
    assert!(!result.partial_match);
    assert_eq!(result.types, vec!["street_address".to_string()]);
}

#[test]
fn deserialize_locality_without_street() {
    let json = load_fixture("geocode_jackson_ms.json");
    let resp: GeocodeResponse = serde_json::from_str(&json).unwrap();
    let address = GeocodedAddress::from(&resp.results[0]);
    assert!(address.line1.is_none());
    assert!(address.zip.is_none());
    assert_eq!(address.city.as_deref(), Some("Jackson"));
    assert_eq!(address.state_code.as_deref(), Some("MS"));
    assert_eq!(address.latitude, 32.310251);
}

#[test]
fn deserialize_error_statuses() {
    let resp: GeocodeResponse =
        serde_json::from_str(&load_fixture("geocode_over_query_limit.json")).unwrap();
    assert_eq!(resp.status, GeocodeStatus::OverQueryLimit);
    assert!(resp.error_message.unwrap().contains("quota"));

    let resp: GeocodeResponse =
        serde_json::from_str(&load_fixture("geocode_zero_results.json")).unwrap();
    assert_eq!(resp.status, GeocodeStatus::ZeroResults);
    assert!(resp.results.is_empty());
    assert!(resp.error_message.is_none());
}

#[test]
fn deserialize_minimal_result() {
    let json = r#"{
        "status": "OK",
        "results": [{
            "formatted_address": "Somewhere",
            "geometry": { "location": { "lat": 1.0, "lng": 2.0 } }
        }]
    }"#;
    let resp: GeocodeResponse = serde_json::from_str(json).unwrap();
    let address = GeocodedAddress::from(&resp.results[0]);
    assert_eq!(address.formatted_address, "Somewhere");
    assert!(address.components.is_empty());
    assert!(address.city.is_none());
}
