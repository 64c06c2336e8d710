use taxroll_lib::calculator::TaxService;
use taxroll_lib::db::Db;
use taxroll_lib::vat::VatClient;
use taxroll_lib::TaxError;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service() -> TaxService {
    let db = Db::open_in_memory().unwrap();
    db.init().unwrap();
    TaxService::new(db, "tenant-1")
}

#[tokio::test]
async fn validates_and_caches() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate/DE123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"valid":true,"company_name":"ACME GMBH","country_code":"DE"}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service();
    let client = VatClient::with_base_url(&mock_server.uri()).unwrap();

    let check = service.validate_vat(&client, "de123456789").await.unwrap();
    assert!(check.valid);
    assert_eq!(check.company_name.as_deref(), Some("ACME GMBH"));

    // Cached: the second call must not hit the network (expect(1)).
    let again = service.validate_vat(&client, "DE123456789").await.unwrap();
    assert!(again.valid);
}

#[tokio::test]
async fn upstream_throttling_is_typed_and_cached() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate/FR999999999"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = service();
    let client = VatClient::with_base_url(&mock_server.uri()).unwrap();

    let first = service.validate_vat(&client, "FR999999999").await;
    assert!(matches!(first, Err(TaxError::RateLimited(_))));

    // The denial was cached with a short TTL; repeated attempts
    // short-circuit without re-calling.
    let second = service.validate_vat(&client, "FR999999999").await;
    assert!(matches!(second, Err(TaxError::RateLimited(_))));
}

#[tokio::test]
async fn malformed_number_is_validation_error() {
    let service = service();
    let client = VatClient::with_base_url("http://127.0.0.1:1").unwrap();
    assert!(matches!(
        service.validate_vat(&client, "99").await,
        Err(TaxError::Validation(_))
    ));
}

#[tokio::test]
async fn server_errors_are_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/validate/DE123456789"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let service = service();
    let client = VatClient::with_base_url(&mock_server.uri()).unwrap();
    assert!(matches!(
        service.validate_vat(&client, "DE123456789").await,
        Err(TaxError::Upstream(_))
    ));
}
