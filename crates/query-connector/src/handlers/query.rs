//! Query handlers.
//!
//! Every successful response is a FHIR `Bundle` of type `searchset`.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use helios_query_engine::{
    FullPatientRequest, PatientDiscoveryRequest, PatientRecordsRequest, QueryResponse, ValueSet,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Media type of every bundle returned.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Body of `POST /api/patient-records`.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientRecordsBody {
    /// Server, patient and saved query.
    #[serde(flatten)]
    pub request: PatientRecordsRequest,
    /// Session-local value set selections merged over the saved query.
    #[serde(default)]
    pub value_set_overrides: Option<Vec<ValueSet>>,
}

/// Query string of `GET /api/query`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FullQueryParams {
    /// Name of the configured FHIR server.
    pub fhir_server: Option<String>,
    /// Name of the saved query.
    pub query_name: Option<String>,
    /// Given name.
    pub given: Option<String>,
    /// Family name.
    pub family: Option<String>,
    /// Birth date, `YYYY-MM-DD`.
    pub dob: Option<String>,
    /// Medical record number.
    pub mrn: Option<String>,
    /// Phone numbers separated by `;`.
    pub phone: Option<String>,
}

impl FullQueryParams {
    fn into_request(self) -> ApiResult<FullPatientRequest> {
        let (Some(fhir_server), Some(query_name)) = (
            self.fhir_server.filter(|s| !s.is_empty()),
            self.query_name.filter(|s| !s.is_empty()),
        ) else {
            return Err(ApiError::bad_request(
                "Missing required query parameters: fhir_server and query_name",
            ));
        };

        Ok(FullPatientRequest {
            discovery: PatientDiscoveryRequest {
                fhir_server,
                first_name: self.given,
                last_name: self.family,
                dob: self.dob,
                mrn: self.mrn,
                phone: self.phone,
            },
            query_name,
        })
    }
}

/// Handler for patient discovery.
///
/// # HTTP Request
///
/// `POST [base]/api/patient-discovery`
///
/// # Response
///
/// - `200 OK` - Bundle of every matching `Patient`, possibly empty
pub async fn patient_discovery_handler(
    State(state): State<AppState>,
    Json(request): Json<PatientDiscoveryRequest>,
) -> ApiResult<Response> {
    debug!(server = %request.fhir_server, "Processing patient discovery request");

    let patients = state.queries().patient_discovery_query(&request).await?;
    let mut response = QueryResponse::new();
    response.insert("Patient", patients);
    Ok(bundle_response(response.to_bundle()))
}

/// Handler for a saved query against a known patient.
///
/// # HTTP Request
///
/// `POST [base]/api/patient-records`
pub async fn patient_records_handler(
    State(state): State<AppState>,
    Json(body): Json<PatientRecordsBody>,
) -> ApiResult<Response> {
    debug!(
        server = %body.request.fhir_server,
        query = %body.request.query_name,
        "Processing patient records request"
    );
    if body.request.patient_id.trim().is_empty() {
        return Err(ApiError::bad_request("patient_id must not be empty"));
    }

    let response = state
        .queries()
        .patient_records_query(&body.request, body.value_set_overrides.as_deref())
        .await?;
    Ok(bundle_response(response.to_bundle()))
}

/// Handler for the combined query with demographics in the query string.
///
/// # HTTP Request
///
/// `GET [base]/api/query?fhir_server=...&query_name=...&given=...&family=...`
///
/// # Response
///
/// - `200 OK` - Bundle of the patient and their records
/// - `400 Bad Request` - missing server, query or patient identifiers
/// - `404 Not Found` - no patient matched
pub async fn full_query_get_handler(
    State(state): State<AppState>,
    Query(params): Query<FullQueryParams>,
) -> ApiResult<Response> {
    full_query(&state, params.into_request()?).await
}

/// Handler for the combined query with a JSON body.
///
/// # HTTP Request
///
/// `POST [base]/api/query`
pub async fn full_query_post_handler(
    State(state): State<AppState>,
    Json(request): Json<FullPatientRequest>,
) -> ApiResult<Response> {
    full_query(&state, request).await
}

async fn full_query(state: &AppState, request: FullPatientRequest) -> ApiResult<Response> {
    if !has_patient_identifiers(&request.discovery) {
        return Err(ApiError::bad_request("No patient identifiers to search on"));
    }
    debug!(
        server = %request.discovery.fhir_server,
        query = %request.query_name,
        "Processing full patient query"
    );

    let response = state.queries().full_patient_query(&request).await?;
    Ok(bundle_response(response.to_bundle()))
}

fn has_patient_identifiers(request: &PatientDiscoveryRequest) -> bool {
    [
        &request.first_name,
        &request.last_name,
        &request.dob,
        &request.mrn,
        &request.phone,
    ]
    .into_iter()
    .flatten()
    .any(|value| !value.trim().is_empty())
}

fn bundle_response(bundle: Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, FHIR_JSON)],
        Json(bundle),
    )
        .into_response()
}
