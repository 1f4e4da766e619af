//! Query execution.
//!
//! [`QueryService`] is the public surface of the engine: patient discovery,
//! patient records, and the two combined. [`QueryExecutionService`] is the
//! implementation that talks to FHIR servers; wrappers such as
//! [`AuditedQueryService`](crate::audit::AuditedQueryService) implement the
//! same trait around it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{ConnectionTestResult, FhirResponse};
use crate::compiler::{CompiledQuery, ResourceQueryKey, SearchRequest};
use crate::error::{QueryError, QueryResult};
use crate::model::{
    FullPatientRequest, PatientDiscoveryRequest, PatientRecordsRequest, QueryResponse, ValueSet,
    reconcile_overrides,
};
use crate::reconciler::reconcile;
use crate::registry::FhirClientRegistry;
use crate::store::SavedQueryStore;

/// Saved queries whose name contains this run only the immunization search.
pub const IMMUNIZATION_QUERY_MARKER: &str = "Immunization";

/// The engine's entry points.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Searches for patients matching the request's demographics.
    ///
    /// Returns every `Patient` found, possibly none.
    async fn patient_discovery_query(
        &self,
        request: &PatientDiscoveryRequest,
    ) -> QueryResult<Vec<Value>>;

    /// Runs a saved query for one patient.
    ///
    /// `overrides` are session-local value set selections merged over the
    /// saved selection before compiling.
    async fn patient_records_query(
        &self,
        request: &PatientRecordsRequest,
        overrides: Option<&[ValueSet]>,
    ) -> QueryResult<QueryResponse>;

    /// Discovery followed by a records query for the first patient found.
    async fn full_patient_query(&self, request: &FullPatientRequest) -> QueryResult<QueryResponse> {
        let patients = self.patient_discovery_query(&request.discovery).await?;
        let patient_id = patients
            .first()
            .and_then(|patient| patient.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| QueryError::PatientNotFound {
                fhir_server: request.discovery.fhir_server.clone(),
            })?;

        let records = PatientRecordsRequest {
            fhir_server: request.discovery.fhir_server.clone(),
            patient_id,
            query_name: request.query_name.clone(),
        };
        let mut response = self.patient_records_query(&records, None).await?;
        if response.get("Patient").is_empty() {
            response.insert("Patient", patients);
        }
        Ok(response)
    }
}

/// Executes queries against the configured FHIR servers.
#[derive(Clone)]
pub struct QueryExecutionService {
    clients: Arc<FhirClientRegistry>,
    saved_queries: Arc<dyn SavedQueryStore>,
}

impl std::fmt::Debug for QueryExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutionService")
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

impl QueryExecutionService {
    pub fn new(clients: Arc<FhirClientRegistry>, saved_queries: Arc<dyn SavedQueryStore>) -> Self {
        Self {
            clients,
            saved_queries,
        }
    }

    pub fn clients(&self) -> &Arc<FhirClientRegistry> {
        &self.clients
    }

    /// Tests the named server and records the outcome in the configuration
    /// store.
    pub async fn test_connection(&self, fhir_server: &str) -> QueryResult<ConnectionTestResult> {
        let client = self.clients.client(fhir_server).await?;
        let result = client.test_connection().await;

        if let Err(err) = self
            .clients
            .store()
            .update_connection_status(&client.config().id, result.success, Utc::now())
            .await
        {
            warn!(server = %fhir_server, error = %err, "Failed to record connection status");
        }
        Ok(result)
    }
}

#[async_trait]
impl QueryService for QueryExecutionService {
    async fn patient_discovery_query(
        &self,
        request: &PatientDiscoveryRequest,
    ) -> QueryResult<Vec<Value>> {
        let client = self.clients.client(&request.fhir_server).await?;
        let response = client.get(&request.search_path()).await?;
        if response.status != 200 {
            warn!(server = %request.fhir_server, status = response.status, "Patient search failed");
        }

        let patients = reconcile([&response]).get("Patient").to_vec();
        debug!(server = %request.fhir_server, count = patients.len(), "Patient discovery complete");
        Ok(patients)
    }

    async fn patient_records_query(
        &self,
        request: &PatientRecordsRequest,
        overrides: Option<&[ValueSet]>,
    ) -> QueryResult<QueryResponse> {
        let saved = self
            .saved_queries
            .saved_query_by_name(&request.query_name)
            .await?;
        let query_data = match overrides {
            Some(overrides) => reconcile_overrides(&saved.query_data, overrides),
            None => saved.query_data,
        };

        let immunization_only = request.query_name.contains(IMMUNIZATION_QUERY_MARKER);
        let compiled = CompiledQuery::compile(
            &query_data,
            &request.patient_id,
            saved.immunization || immunization_only,
        );

        let client = self.clients.client(&request.fhir_server).await?;
        // Resolve once up front: an authentication failure ends the query
        // before any search is sent.
        let credential = client.ensure_credential().await?;

        if immunization_only {
            let search = compiled.get_query(ResourceQueryKey::Immunization.as_str());
            let response = client.execute_with(&search, &credential).await?;
            return Ok(reconcile([&response]));
        }

        let searches: Vec<&SearchRequest> = compiled.iter().map(|(_, search)| search).collect();
        let outcomes = join_all(
            searches
                .iter()
                .map(|search| client.execute_with(search, &credential)),
        )
        .await;

        let responses: Vec<FhirResponse> = outcomes
            .into_iter()
            .zip(&searches)
            .filter_map(|(outcome, search)| match outcome {
                Ok(response) => Some(response),
                Err(err) => {
                    warn!(
                        server = %request.fhir_server,
                        path = %search.base_path,
                        error = %err,
                        "FHIR search failed; continuing without it"
                    );
                    None
                }
            })
            .collect();

        let response = reconcile(&responses);
        debug!(
            server = %request.fhir_server,
            searches = searches.len(),
            succeeded = responses.len(),
            resources = response.total(),
            "Patient records query complete"
        );
        Ok(response)
    }
}
