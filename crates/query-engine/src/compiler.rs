//! Query compiler.
//!
//! Flattens a [`NestedQuery`] into one FHIR search descriptor per target
//! resource type. Compilation is pure: no I/O, and malformed input is logged
//! and skipped rather than failing the whole compilation.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::model::{ConceptType, NestedQuery};

/// The resource searches the compiler can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceQueryKey {
    /// Lab observations filtered by code.
    Observation,
    DiagnosticReport,
    /// Encounters filtered by reason code.
    Encounter,
    Condition,
    /// Medication requests with linked medications and administrations.
    MedicationRequest,
    /// Observations with `category=social-history`; always emitted.
    SocialHistory,
    /// Immunizations, searched with GET.
    Immunization,
}

impl ResourceQueryKey {
    /// Every key, in compilation order.
    pub const ALL: [ResourceQueryKey; 7] = [
        ResourceQueryKey::SocialHistory,
        ResourceQueryKey::Immunization,
        ResourceQueryKey::Observation,
        ResourceQueryKey::DiagnosticReport,
        ResourceQueryKey::Encounter,
        ResourceQueryKey::Condition,
        ResourceQueryKey::MedicationRequest,
    ];

    /// The lookup key used by [`CompiledQuery::get_query`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceQueryKey::Observation => "observation",
            ResourceQueryKey::DiagnosticReport => "diagnosticReport",
            ResourceQueryKey::Encounter => "encounter",
            ResourceQueryKey::Condition => "condition",
            ResourceQueryKey::MedicationRequest => "medicationRequest",
            ResourceQueryKey::SocialHistory => "socialHistory",
            ResourceQueryKey::Immunization => "immunization",
        }
    }

    /// Parses a lookup key.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for ResourceQueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method a search descriptor must be sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMethod {
    Get,
    /// Form-encoded `_search`; code lists can exceed URL length limits.
    #[default]
    Post,
}

/// One compiled FHIR search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRequest {
    /// Path relative to the server base URL, e.g. `/Observation/_search`.
    /// Empty for the "no such query" descriptor.
    pub base_path: String,
    pub params: BTreeMap<String, String>,
    pub method: SearchMethod,
}

impl SearchRequest {
    fn post(base_path: &str) -> Self {
        Self {
            base_path: base_path.to_string(),
            params: BTreeMap::new(),
            method: SearchMethod::Post,
        }
    }

    fn get(base_path: &str) -> Self {
        Self {
            base_path: base_path.to_string(),
            params: BTreeMap::new(),
            method: SearchMethod::Get,
        }
    }

    fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// True for the placeholder returned for unknown keys.
    pub fn is_empty(&self) -> bool {
        self.base_path.is_empty()
    }

    /// Path plus URL-encoded query string, for GET requests.
    pub fn path_with_query(&self) -> String {
        if self.params.is_empty() {
            return self.base_path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish();
        format!("{}?{}", self.base_path, query)
    }
}

/// Codes collected from the included concepts, one bucket per concept type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CodeBuckets {
    labs: Vec<String>,
    conditions: Vec<String>,
    medications: Vec<String>,
}

impl CodeBuckets {
    fn collect(query: &NestedQuery) -> Self {
        let mut buckets = CodeBuckets::default();

        for (condition_id, value_sets) in query {
            for (vs_id, value_set) in value_sets {
                // Inclusion comes from the concepts; `include_value_set` may be stale.
                let codes = value_set
                    .included_concepts()
                    .map(|c| c.code.trim())
                    .filter(|code| {
                        if code.is_empty() {
                            warn!(condition = %condition_id, value_set = %vs_id, "Skipping concept with empty code");
                        }
                        !code.is_empty()
                    });

                let bucket = match value_set.dibbs_concept_type {
                    ConceptType::Labs => &mut buckets.labs,
                    ConceptType::Conditions => &mut buckets.conditions,
                    ConceptType::Medications => &mut buckets.medications,
                    ConceptType::Unknown => {
                        warn!(condition = %condition_id, value_set = %vs_id, "Skipping value set with unknown concept type");
                        continue;
                    }
                };

                for code in codes {
                    if !bucket.iter().any(|c| c == code) {
                        bucket.push(code.to_string());
                    }
                }
            }
        }

        buckets
    }
}

/// The search descriptors compiled for one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    patient_id: String,
    queries: BTreeMap<ResourceQueryKey, SearchRequest>,
}

impl CompiledQuery {
    /// Compiles `query` for `patient_id`.
    ///
    /// The social-history search is always emitted. The immunization search
    /// is emitted only when `include_immunization` is set. Every code-driven
    /// search is omitted when its bucket is empty.
    pub fn compile(query: &NestedQuery, patient_id: &str, include_immunization: bool) -> Self {
        let buckets = CodeBuckets::collect(query);
        let subject = format!("Patient/{patient_id}");
        let mut queries = BTreeMap::new();

        queries.insert(
            ResourceQueryKey::SocialHistory,
            SearchRequest::post("/Observation/_search")
                .param("subject", subject.as_str())
                .param("category", "social-history"),
        );

        if include_immunization {
            queries.insert(
                ResourceQueryKey::Immunization,
                SearchRequest::get("/Immunization").param("patient", patient_id),
            );
        }

        if !buckets.labs.is_empty() {
            let codes = buckets.labs.join(",");
            queries.insert(
                ResourceQueryKey::Observation,
                SearchRequest::post("/Observation/_search")
                    .param("subject", subject.as_str())
                    .param("code", codes.as_str()),
            );
            queries.insert(
                ResourceQueryKey::DiagnosticReport,
                SearchRequest::post("/DiagnosticReport/_search")
                    .param("subject", subject.as_str())
                    .param("code", codes),
            );
        }

        if !buckets.conditions.is_empty() {
            let codes = buckets.conditions.join(",");
            queries.insert(
                ResourceQueryKey::Encounter,
                SearchRequest::post("/Encounter/_search")
                    .param("subject", subject.as_str())
                    .param("reason-code", codes.as_str()),
            );
            queries.insert(
                ResourceQueryKey::Condition,
                SearchRequest::post("/Condition/_search")
                    .param("subject", subject.as_str())
                    .param("code", codes),
            );
        }

        if !buckets.medications.is_empty() {
            queries.insert(
                ResourceQueryKey::MedicationRequest,
                SearchRequest::post("/MedicationRequest/_search")
                    .param("subject", subject.as_str())
                    .param("code", buckets.medications.join(","))
                    .param("_include", "MedicationRequest:medication")
                    .param("_revinclude", "MedicationAdministration:request"),
            );
        }

        debug!(
            patient_id = %patient_id,
            searches = queries.len(),
            labs = buckets.labs.len(),
            conditions = buckets.conditions.len(),
            medications = buckets.medications.len(),
            "Compiled patient records query"
        );

        Self {
            patient_id: patient_id.to_string(),
            queries,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Looks a descriptor up by key.
    ///
    /// Unknown or unset keys return an empty descriptor instead of failing.
    pub fn get_query(&self, key: &str) -> SearchRequest {
        ResourceQueryKey::parse(key)
            .and_then(|k| self.queries.get(&k))
            .cloned()
            .unwrap_or_default()
    }

    /// Typed lookup.
    pub fn get(&self, key: ResourceQueryKey) -> Option<&SearchRequest> {
        self.queries.get(&key)
    }

    /// Every emitted descriptor with its key.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceQueryKey, &SearchRequest)> {
        self.queries.iter().map(|(k, v)| (*k, v))
    }

    /// Descriptors to send as form-encoded `_search` POSTs.
    pub fn post_requests(&self) -> impl Iterator<Item = &SearchRequest> {
        self.queries
            .values()
            .filter(|q| q.method == SearchMethod::Post && !q.is_empty())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
