use salestax_api::{Client, RateQuery};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_rates_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .and(query_param("zip_code", "78701"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"zip_code":"78701","state":"TX","state_rate":6.25,"county_rate":0.0,"city_rate":1.0,"additional_rate":1.0,"total_rate":8.25}"#,
        ))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let resp = client.get_rates(&RateQuery::by_zip("78701")).await.unwrap();
    assert_eq!(resp.state.as_deref(), Some("TX"));
    assert!((resp.combined_percentage() - 8.25).abs() < 1e-9);
}

#[tokio::test]
async fn get_rates_decimal_convention() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"state":"TX","state_rate":0.0625,"county_rate":0.0,"city_rate":0.02,"additional_rate":0.0}"#,
        ))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let resp = client
        .get_rates(&RateQuery::by_city_state("Austin", "TX"))
        .await
        .unwrap();
    assert!((resp.combined_percentage() - 8.25).abs() < 1e-9);
}

#[tokio::test]
async fn get_rates_rate_limited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let result = client.get_rates(&RateQuery::by_zip("78701")).await;
    assert!(matches!(result, Err(salestax_api::Error::RateLimited)));
}

#[tokio::test]
async fn get_rates_invalid_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "bad-key").unwrap();
    let result = client.get_rates(&RateQuery::by_zip("78701")).await;
    assert!(matches!(result, Err(salestax_api::Error::InvalidApiKey)));
}

#[tokio::test]
async fn get_rates_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let result = client.get_rates(&RateQuery::by_zip("78701")).await;
    assert!(matches!(
        result,
        Err(salestax_api::Error::HttpStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn get_rates_malformed_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not valid json}"))
        .mount(&mock_server)
        .await;

    let client = Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let result = client.get_rates(&RateQuery::by_zip("78701")).await;
    assert!(matches!(result, Err(salestax_api::Error::ParseFailed(_))));
}

#[test]
fn missing_api_key_fails_fast() {
    let result = Client::new("");
    assert!(matches!(result, Err(salestax_api::Error::MissingApiKey)));
}
