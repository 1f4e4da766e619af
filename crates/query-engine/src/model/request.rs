//! Inputs to the orchestrator entry points.
//!
//! These derive `Serialize` so an audit wrapper can record them verbatim.

use serde::{Deserialize, Serialize};

/// Demographics used to find a patient on one FHIR server.
///
/// Every non-empty field becomes one AND-combined search parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDiscoveryRequest {
    /// Name of the configured FHIR server.
    pub fhir_server: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Birth date, `YYYY-MM-DD`.
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub mrn: Option<String>,
    /// One or more phone numbers separated by `;`.
    #[serde(default)]
    pub phone: Option<String>,
}

impl PatientDiscoveryRequest {
    /// Creates a request with no filters.
    pub fn new(fhir_server: impl Into<String>) -> Self {
        Self {
            fhir_server: fhir_server.into(),
            ..Default::default()
        }
    }

    /// Builds the `Patient` search path for these demographics.
    ///
    /// Phone candidates are OR-combined into a single `phone=` parameter.
    pub fn search_path(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(given) = present(&self.first_name) {
            query.append_pair("given", &given);
        }
        if let Some(family) = present(&self.last_name) {
            query.append_pair("family", &family);
        }
        if let Some(dob) = present(&self.dob) {
            query.append_pair("birthdate", &dob);
        }
        if let Some(mrn) = present(&self.mrn) {
            query.append_pair("identifier", &mrn);
        }
        let phones = self.phone_candidates();
        if !phones.is_empty() {
            query.append_pair("phone", &phones.join(","));
        }

        let query = query.finish();
        if query.is_empty() {
            "/Patient".to_string()
        } else {
            format!("/Patient?{query}")
        }
    }

    /// Splits the phone field into its non-empty candidates.
    pub fn phone_candidates(&self) -> Vec<String> {
        self.phone
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Runs a saved query for a known patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecordsRequest {
    pub fhir_server: String,
    pub patient_id: String,
    pub query_name: String,
}

/// Discovery followed by a records query for the first match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPatientRequest {
    #[serde(flatten)]
    pub discovery: PatientDiscoveryRequest,
    pub query_name: String,
}
