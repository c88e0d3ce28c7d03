use geocoder_api::{Client, Error, GeocodeQuery, GeocodeStatus};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEOCODE_PATH: &str = "/maps/api/geocode/json";

fn load_fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

async fn mount_fixture(server: &MockServer, status: u16, fixture: &str) {
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(load_fixture(fixture)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn geocode_success() {
    let mock_server = MockServer::start().await;
    mount_fixture(&mock_server, 200, "geocode_oakland.json").await;

    let client = Client::with_base_url(&mock_server.uri(), Some("test-key".to_string())).unwrap();
    let result = client.geocode("1200 Broadway, Oakland, CA").await;
    assert!(result.is_ok());

    let address = result.unwrap().expect("one result");
    assert_eq!(address.latitude, 37.8030442);
    assert_eq!(address.longitude, -122.2739699);
    assert_eq!(address.line1.as_deref(), Some("1200 Broadway"));
    assert_eq!(address.city.as_deref(), Some("Oakland"));
    assert_eq!(address.state_code.as_deref(), Some("CA"));
    assert_eq!(address.zip.as_deref(), Some("94612"));
    assert_eq!(address.formatted_address, "1200 Broadway, Oakland, CA 94612, USA");
}

#[tokio::test]
async fn geocode_sends_key_and_address() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .and(query_param("address", "Jackson, MS"))
        .and(query_param("key", "test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(load_fixture("geocode_jackson_ms.json")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), Some("test-key".to_string())).unwrap();
    let address = client.geocode("Jackson, MS").await.unwrap().unwrap();
    assert!(address.partial_match);
    assert_eq!(address.state_code.as_deref(), Some("MS"));
}

#[tokio::test]
async fn geocode_zero_results_is_none() {
    let mock_server = MockServer::start().await;
    mount_fixture(&mock_server, 200, "geocode_zero_results.json").await;

    let client = Client::with_base_url(&mock_server.uri(), None).unwrap();
    let result = client.geocode("nowhere in particular").await;
    assert!(matches!(result, Ok(None)));
}

#[tokio::test]
async fn geocode_over_query_limit_body() {
    let mock_server = MockServer::start().await;
    mount_fixture(&mock_server, 200, "geocode_over_query_limit.json").await;

    let client = Client::with_base_url(&mock_server.uri(), Some("test-key".to_string())).unwrap();
    let err = client.geocode("Oakland, CA").await.unwrap_err();
    assert!(err.is_quota_exceeded());
}

#[tokio::test]
async fn geocode_http_429() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), None).unwrap();
    let result = client.geocode("Oakland, CA").await;
    assert!(matches!(result, Err(Error::QuotaExceeded)));
}

#[tokio::test]
async fn geocode_request_denied() {
    let mock_server = MockServer::start().await;
    mount_fixture(&mock_server, 200, "geocode_request_denied.json").await;

    let client = Client::with_base_url(&mock_server.uri(), Some("bad".to_string())).unwrap();
    match client.geocode("Oakland, CA").await {
        Err(Error::RequestDenied(msg)) => assert!(msg.contains("invalid")),
        other => panic!("expected RequestDenied, got {:?}", other),
    }
}

#[tokio::test]
async fn geocode_server_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), None).unwrap();
    match client.geocode("Oakland, CA").await {
        Err(Error::HttpStatus { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "Internal Server Error");
        }
        other => panic!("expected HttpStatus, got {:?}", other),
    }
}

#[tokio::test]
async fn geocode_malformed_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not valid json}"))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), None).unwrap();
    let result = client.geocode("Oakland, CA").await;
    assert!(matches!(result, Err(Error::ParseFailed(_))));
}

#[tokio::test]
async fn geocode_raw_passes_through_components() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .and(query_param("components", "country:US"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(load_fixture("geocode_oakland.json")),
        )
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), None).unwrap();
    let query = GeocodeQuery::new("1200 Broadway").with_component("country", "US");
    let resp = client.geocode_raw(&query).await.unwrap();
    assert_eq!(resp.status, GeocodeStatus::Ok);
    assert_eq!(resp.results.len(), 1);
}
