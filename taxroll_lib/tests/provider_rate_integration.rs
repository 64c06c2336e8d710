use chrono::NaiveDate;
use taxroll_lib::calculator::{CalcRequest, CalcType, TaxService};
use taxroll_lib::db::Db;
use taxroll_lib::jurisdiction::{generate_code, Jurisdiction, JurisdictionType, Provenance};
use taxroll_lib::Address;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn db_with_bare_state() -> Db {
    let db = Db::open_in_memory().unwrap();
    db.init().unwrap();
    // A state jurisdiction with no stored rates, so the calculator asks
    // the external pricing engine.
    let j = Jurisdiction {
        id: None,
        code: generate_code(JurisdictionType::State, "Texas"),
        name: "Texas".into(),
        jurisdiction_type: JurisdictionType::State,
        state_code: "TX".into(),
        priority: 2,
        external_id: Some("1".into()),
        provenance: Provenance::Index,
    };
    db.upsert_jurisdiction(&j).unwrap();
    db
}

fn request() -> CalcRequest {
    CalcRequest {
        amount: 100.0,
        service_type: "voip".into(),
        address: Address::new("1100 Congress Ave", "Austin", "TX", "78701"),
        client_id: None,
        subject_ref: None,
        calculation_type: CalcType::Preview,
        include_federal_excise: false,
        include_usf: false,
    }
}

#[tokio::test]
async fn external_rate_fills_missing_state_rate() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"state":"TX","state_rate":0.0625,"county_rate":0.0,"city_rate":0.0,"additional_rate":0.0}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = salestax_api::Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let service = TaxService::new(db_with_bare_state(), "tenant-1").with_rates_api(client);

    let result = service.calculate(&request()).await.unwrap();
    assert!(result.success);
    assert!(!result.estimated);
    assert!(result.fallback_used);
    // Decimal-form provider response normalized to 6.25%.
    assert!((result.total_tax - 6.25).abs() < 1e-9);

    // Second calculation: hot cache / query cache, no second HTTP call.
    let again = service.calculate(&request()).await.unwrap();
    assert!((again.total_tax - 6.25).abs() < 1e-9);
}

#[tokio::test]
async fn provider_failure_degrades_to_estimate() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = salestax_api::Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let service = TaxService::new(db_with_bare_state(), "tenant-1").with_rates_api(client);

    let result = service.calculate(&request()).await.unwrap();
    // Rate-limited upstream: the national-average estimate takes over and
    // the result is flagged, not failed.
    assert!(result.success);
    assert!(result.estimated);
    assert!(result.fallback_used);
    assert_eq!(result.breakdown.len(), 1);
    assert!(result.breakdown[0].estimated);
}

#[tokio::test]
async fn cached_provider_error_short_circuits() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = salestax_api::Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let mut service = TaxService::new(db_with_bare_state(), "tenant-1").with_rates_api(client);
    service = service.with_retry_config(taxroll_lib::retry::RetryConfig {
        max_retries: 0,
        delay: std::time::Duration::from_millis(1),
    });

    service.calculate(&request()).await.unwrap();
    // The failure is cached with a short TTL; the second calculation must
    // not re-call the provider (expect(1)).
    let result = service.calculate(&request()).await.unwrap();
    assert!(result.estimated);
}

#[tokio::test]
async fn local_rates_beat_the_provider() {
    // When a stored state rate exists the provider is never consulted.
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"state_rate":9.99}"#))
        .expect(0)
        .mount(&mock_server)
        .await;

    let db = db_with_bare_state();
    let state = db.get_jurisdiction("STATE_TEXAS", "TX").unwrap().unwrap();
    db.insert_rate_version(
        state.id.unwrap(),
        "*",
        "sales",
        "percentage",
        Some(6.25),
        None,
        None,
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        None,
        "comptroller",
    )
    .unwrap();

    let client = salestax_api::Client::with_base_url(&mock_server.uri(), "test-key").unwrap();
    let service = TaxService::new(db, "tenant-1").with_rates_api(client);

    let result = service.calculate(&request()).await.unwrap();
    assert!((result.total_tax - 6.25).abs() < 1e-9);
    assert!(!result.fallback_used);
}
