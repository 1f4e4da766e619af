//! Audit wrapping for the engine's entry points.
//!
//! [`AuditedQueryService`] implements [`QueryService`] around another
//! implementation and hands one [`AuditRecord`] per call to an [`AuditSink`].
//! The engine does not store audit rows itself.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::QueryResult;
use crate::execution::QueryService;
use crate::model::{PatientDiscoveryRequest, PatientRecordsRequest, QueryResponse, ValueSet};

/// Action name recorded for patient discovery.
pub const PATIENT_DISCOVERY_ACTION: &str = "patientDiscoveryQuery";
/// Action name recorded for patient records.
pub const PATIENT_RECORDS_ACTION: &str = "patientRecordsQuery";

/// How an audited call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Resource counts per type.
    Success { resource_counts: BTreeMap<String, usize> },
    Failure { error_kind: String, message: String },
}

/// One audited call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: &'static str,
    /// The call's arguments, serialised deterministically.
    pub arguments: Value,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Receives audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Emits audit records as `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        let outcome = serde_json::to_string(&record.outcome).unwrap_or_default();
        info!(
            target: "audit",
            action = record.action,
            arguments = %record.arguments,
            outcome = %outcome,
            duration_ms = record.duration_ms,
            "Query audited"
        );
    }
}

/// A [`QueryService`] that audits every discovery and records call.
#[derive(Debug, Clone)]
pub struct AuditedQueryService<S, A> {
    inner: S,
    sink: A,
}

impl<S, A> AuditedQueryService<S, A>
where
    S: QueryService,
    A: AuditSink,
{
    pub fn new(inner: S, sink: A) -> Self {
        Self { inner, sink }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    async fn audit<T>(
        &self,
        action: &'static str,
        arguments: Value,
        started: Instant,
        result: &QueryResult<T>,
        counts: impl FnOnce(&T) -> BTreeMap<String, usize>,
    ) {
        let outcome = match result {
            Ok(value) => AuditOutcome::Success {
                resource_counts: counts(value),
            },
            Err(err) => AuditOutcome::Failure {
                error_kind: err.kind().to_string(),
                message: err.to_string(),
            },
        };

        self.sink
            .record(AuditRecord {
                action,
                arguments,
                outcome,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                timestamp: Utc::now(),
            })
            .await;
    }
}

#[async_trait]
impl<S, A> QueryService for AuditedQueryService<S, A>
where
    S: QueryService,
    A: AuditSink,
{
    async fn patient_discovery_query(
        &self,
        request: &PatientDiscoveryRequest,
    ) -> QueryResult<Vec<Value>> {
        let started = Instant::now();
        let result = self.inner.patient_discovery_query(request).await;

        let arguments = json!({ "request": request });
        self.audit(PATIENT_DISCOVERY_ACTION, arguments, started, &result, |patients| {
            BTreeMap::from([("Patient".to_string(), patients.len())])
        })
        .await;
        result
    }

    async fn patient_records_query(
        &self,
        request: &PatientRecordsRequest,
        overrides: Option<&[ValueSet]>,
    ) -> QueryResult<QueryResponse> {
        let started = Instant::now();
        let result = self.inner.patient_records_query(request, overrides).await;

        let arguments = json!({ "request": request, "valueSetOverrides": overrides });
        self.audit(PATIENT_RECORDS_ACTION, arguments, started, &result, QueryResponse::counts)
            .await;
        result
    }
}
