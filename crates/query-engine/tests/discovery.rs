//! Integration tests for patient discovery and the combined query.

mod common;

use common::fixtures::{PATIENT_ID, bundle, patient, resource, saved_query};
use common::harness::{EngineHarness, SERVER_NAME};
use helios_query_engine::{
    AuditedQueryService, ErrorKind, FullPatientRequest, PatientDiscoveryRequest, QueryService,
    TracingAuditSink,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const QUERY_NAME: &str = "Gonorrhea case investigation";

fn discovery_request() -> PatientDiscoveryRequest {
    PatientDiscoveryRequest {
        first_name: Some("Hyper".to_string()),
        last_name: Some("Unlucky".to_string()),
        dob: Some("1975-12-06".to_string()),
        mrn: Some("8692756".to_string()),
        phone: Some("517-425-1398; 8045551234".to_string()),
        ..PatientDiscoveryRequest::new(SERVER_NAME)
    }
}

#[tokio::test]
async fn test_discovery_sends_every_demographic() {
    let harness = EngineHarness::start(vec![]).await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .and(query_param("given", "Hyper"))
        .and(query_param("family", "Unlucky"))
        .and(query_param("birthdate", "1975-12-06"))
        .and(query_param("identifier", "8692756"))
        .and(query_param("phone", "517-425-1398,8045551234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[
            patient(PATIENT_ID, "Hyper", "Unlucky"),
            patient("patient-2", "Hyper", "Unlucky"),
        ])))
        .expect(1)
        .mount(&harness.fhir)
        .await;

    let patients = harness
        .service
        .patient_discovery_query(&discovery_request())
        .await
        .unwrap();

    assert_eq!(patients.len(), 2);
    assert_eq!(patients[0]["id"], PATIENT_ID);
}

#[tokio::test]
async fn test_discovery_without_matches_is_empty() {
    let harness = EngineHarness::start(vec![]).await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .mount(&harness.fhir)
        .await;

    let patients = harness
        .service
        .patient_discovery_query(&PatientDiscoveryRequest::new(SERVER_NAME))
        .await
        .unwrap();
    assert!(patients.is_empty());
}

#[tokio::test]
async fn test_discovery_error_status_yields_no_patients() {
    let harness = EngineHarness::start(vec![]).await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&harness.fhir)
        .await;

    let patients = harness
        .service
        .patient_discovery_query(&discovery_request())
        .await
        .unwrap();
    assert!(patients.is_empty());
}

#[tokio::test]
async fn test_discovery_ignores_non_patient_entries() {
    let harness = EngineHarness::start(vec![]).await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[
            patient(PATIENT_ID, "Hyper", "Unlucky"),
            resource("OperationOutcome", "warning"),
        ])))
        .mount(&harness.fhir)
        .await;

    let patients = harness
        .service
        .patient_discovery_query(&discovery_request())
        .await
        .unwrap();
    assert_eq!(patients.len(), 1);
}

#[tokio::test]
async fn test_full_query_runs_records_for_first_patient() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[
            patient(PATIENT_ID, "Hyper", "Unlucky"),
            patient("patient-2", "Hyper", "Unlucky"),
        ])))
        .mount(&harness.fhir)
        .await;
    harness
        .mock_search(
            "Condition",
            &format!("subject=Patient%2F{PATIENT_ID}"),
            &[resource("Condition", "cond-1")],
        )
        .await;

    let request = FullPatientRequest {
        discovery: discovery_request(),
        query_name: QUERY_NAME.to_string(),
    };
    let response = harness.service.full_patient_query(&request).await.unwrap();

    assert_eq!(response.get("Patient").len(), 2);
    assert_eq!(response.get("Condition").len(), 1);
}

#[tokio::test]
async fn test_full_query_without_patient_is_not_found() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .mount(&harness.fhir)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&[])))
        .expect(0)
        .mount(&harness.fhir)
        .await;

    let request = FullPatientRequest {
        discovery: discovery_request(),
        query_name: QUERY_NAME.to_string(),
    };
    let err = harness
        .service
        .full_patient_query(&request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PatientNotFound);
}

#[tokio::test]
async fn test_audited_service_passes_results_through() {
    let harness = EngineHarness::start(vec![saved_query(QUERY_NAME, false)]).await;
    harness.mock_empty_searches().await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(bundle(&[patient(PATIENT_ID, "Hyper", "Unlucky")])),
        )
        .mount(&harness.fhir)
        .await;

    let audited = AuditedQueryService::new(harness.service.clone(), TracingAuditSink);
    let request = FullPatientRequest {
        discovery: discovery_request(),
        query_name: QUERY_NAME.to_string(),
    };
    let response = audited.full_patient_query(&request).await.unwrap();
    assert_eq!(response.get("Patient").len(), 1);
}
