//! Integration tests for patient records queries.
//!
//! Covers compiling a saved query into searches, running them against a mock
//! FHIR server, partial failure, immunization handling, value set overrides
//! and de-duplication across searches.

mod common;

use common::fixtures::{
    CONDITION_CODE, LAB_CODE, MEDICATION_CODE, PATIENT_ID, bundle, empty_saved_query, resource,
    saved_query, value_set,
};
use common::harness::EngineHarness;
use helios_query_engine::{ConceptType, ErrorKind, QueryService, ValueSet};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const QUERY_NAME: &str = "Chlamydia case investigation";

#[tokio::test]
async fn test_records_query_assembles_every_search() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness
        .mock_search(
            "Observation",
            "category=social-history",
            &[resource("Observation", "obs-sh")],
        )
        .await;
    harness
        .mock_search(
            "Observation",
            &format!("code={LAB_CODE}"),
            &[resource("Observation", "obs-1")],
        )
        .await;
    harness
        .mock_search(
            "DiagnosticReport",
            &format!("code={LAB_CODE}"),
            &[resource("DiagnosticReport", "dr-1")],
        )
        .await;
    harness
        .mock_search(
            "Encounter",
            &format!("reason-code={CONDITION_CODE}"),
            &[resource("Encounter", "enc-1")],
        )
        .await;
    harness
        .mock_search(
            "Condition",
            &format!("code={CONDITION_CODE}"),
            &[resource("Condition", "cond-1")],
        )
        .await;
    harness
        .mock_search(
            "MedicationRequest",
            "_revinclude=MedicationAdministration%3Arequest",
            &[
                resource("MedicationRequest", "med-1"),
                resource("Medication", "medication-1"),
                resource("MedicationAdministration", "admin-1"),
            ],
        )
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();

    assert_eq!(response.get("Observation").len(), 2);
    assert_eq!(response.get("DiagnosticReport").len(), 1);
    assert_eq!(response.get("Encounter").len(), 1);
    assert_eq!(response.get("Condition").len(), 1);
    assert_eq!(response.get("MedicationRequest").len(), 1);
    assert_eq!(response.get("Medication").len(), 1);
    assert_eq!(response.get("MedicationAdministration").len(), 1);
    assert!(response.get("Immunization").is_empty());
    assert_eq!(response.total(), 8);
}

#[tokio::test]
async fn test_searches_are_scoped_to_the_patient() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    Mock::given(method("POST"))
        .and(body_string_contains(format!("subject=Patient%2F{PATIENT_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(6)
        .mount(&harness.fhir)
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_resource_returned_by_two_searches_is_kept_once() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    harness
        .mock_search(
            "Observation",
            "category=social-history",
            &[resource("Observation", "obs-1")],
        )
        .await;
    harness
        .mock_search(
            "Observation",
            &format!("code={LAB_CODE}"),
            &[resource("Observation", "obs-1"), resource("Observation", "obs-2")],
        )
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();

    let mut ids: Vec<_> = response
        .get("Observation")
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["obs-1", "obs-2"]);
}

#[tokio::test]
async fn test_failed_search_does_not_sink_the_others() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("POST"))
        .and(path("/Encounter/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&harness.fhir)
        .await;
    harness
        .mock_search(
            "Condition",
            &format!("code={CONDITION_CODE}"),
            &[resource("Condition", "cond-1")],
        )
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();

    assert!(response.get("Encounter").is_empty());
    assert_eq!(response.get("Condition").len(), 1);
}

#[tokio::test]
async fn test_malformed_body_contributes_nothing() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("POST"))
        .and(path("/DiagnosticReport/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not fhir</html>"))
        .mount(&harness.fhir)
        .await;
    harness
        .mock_search(
            "Condition",
            &format!("code={CONDITION_CODE}"),
            &[resource("Condition", "cond-1")],
        )
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();

    assert!(response.get("DiagnosticReport").is_empty());
    assert_eq!(response.get("Condition").len(), 1);
}

#[tokio::test]
async fn test_flagged_query_fetches_immunizations_with_get() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, true)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("GET"))
        .and(path("/Immunization"))
        .and(query_param("patient", PATIENT_ID))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(bundle(&[resource("Immunization", "imm-1")])),
        )
        .expect(1)
        .mount(&harness.fhir)
        .await;
    Mock::given(method("POST"))
        .and(path("/Immunization/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(0)
        .mount(&harness.fhir)
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();
    assert_eq!(response.get("Immunization").len(), 1);
}

#[tokio::test]
async fn test_immunization_named_query_sends_only_the_immunization_get() {
    let name = "Immunization history";
    let harness = EngineHarness::start(vec![saved_query(name, false)]).await;
    Mock::given(method("GET"))
        .and(path("/Immunization"))
        .and(query_param("patient", PATIENT_ID))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[
            resource("Immunization", "imm-1"),
            resource("Immunization", "imm-2"),
        ])))
        .expect(1)
        .mount(&harness.fhir)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(0)
        .mount(&harness.fhir)
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(name), None)
        .await
        .unwrap();

    assert_eq!(response.resource_types().collect::<Vec<_>>(), vec!["Immunization"]);
    assert_eq!(response.get("Immunization").len(), 2);
}

#[tokio::test]
async fn test_immunization_named_query_propagates_transport_failure() {
    let name = "Immunization history";
    let harness = EngineHarness::start_with(vec![saved_query(name, false)], |mut config| {
        config.hostname = "http://127.0.0.1:1".to_string();
        config
    })
    .await;

    let err = harness
        .service
        .patient_records_query(&harness.records_request(name), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_unreachable_server_yields_empty_batched_response() {
    let harness = EngineHarness::start_with(vec![saved_query(QUERY_NAME, false)], |mut config| {
        config.hostname = "http://127.0.0.1:1".to_string();
        config
    })
    .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_empty_selection_runs_only_social_history() {
    let harness = EngineHarness::start(vec![empty_saved_query(QUERY_NAME)]).await;
    Mock::given(method("POST"))
        .and(path("/Observation/_search"))
        .and(body_string_contains("category=social-history"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(bundle(&[resource("Observation", "sh-1")])),
        )
        .expect(1)
        .mount(&harness.fhir)
        .await;

    let response = harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), None)
        .await
        .unwrap();

    let requests = harness.fhir.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(response.get("Observation").len(), 1);
}

#[tokio::test]
async fn test_override_replaces_saved_codes() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("POST"))
        .and(path("/Observation/_search"))
        .and(body_string_contains("code=99999-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(1)
        .mount(&harness.fhir)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains(format!("code={LAB_CODE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(0)
        .mount(&harness.fhir)
        .await;

    let overrides = vec![value_set("labs-vs", ConceptType::Labs, "99999-9")];
    harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), Some(&overrides))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_override_that_excludes_value_set_keeps_saved_selection() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("POST"))
        .and(path("/Encounter/_search"))
        .and(body_string_contains(format!("reason-code={CONDITION_CODE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(1)
        .mount(&harness.fhir)
        .await;
    Mock::given(method("POST"))
        .and(path("/Condition/_search"))
        .and(body_string_contains(format!("code={CONDITION_CODE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(1)
        .mount(&harness.fhir)
        .await;

    let overrides = vec![ValueSet::new("conditions-vs", ConceptType::Conditions)];
    assert!(!overrides[0].include_value_set);
    harness
        .service
        .patient_records_query(&harness.records_request(QUERY_NAME), Some(&overrides))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_saved_query_fails_before_any_request() {
    let harness = EngineHarness::start(vec![]).await;

    let err = harness
        .service
        .patient_records_query(&harness.records_request("Nope"), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(harness.fhir.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_server_is_configuration_error() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    let mut request = harness.records_request(QUERY_NAME);
    request.fhir_server = "Elsewhere".to_string();

    let err = harness
        .service
        .patient_records_query(&request, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("Elsewhere"));
}
