//! Response reconciliation.
//!
//! Merges the search-set bundles returned by one execution into a single
//! [`QueryResponse`]. A resource seen once, whether earlier in the same
//! bundle or in another response, is never emitted again. Failed and
//! malformed responses are logged and contribute nothing.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::FhirResponse;
use crate::model::QueryResponse;

/// Tracks which resources have already been emitted.
#[derive(Debug, Default)]
pub struct ResponseReconciler {
    seen: HashSet<(String, String)>,
    response: QueryResponse,
}

impl ResponseReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one response. Returns the number of resources it contributed.
    pub fn add(&mut self, fhir_response: &FhirResponse) -> usize {
        if fhir_response.status != 200 {
            warn!(
                url = %fhir_response.url,
                status = fhir_response.status,
                body = %fhir_response.body,
                "FHIR search failed; contributing no resources"
            );
            return 0;
        }

        let bundle = match fhir_response.json() {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(url = %fhir_response.url, error = %err, "Response is not valid JSON");
                return 0;
            }
        };
        self.add_bundle(&fhir_response.url, bundle)
    }

    /// Adds an already-parsed search-set bundle.
    pub fn add_bundle(&mut self, url: &str, bundle: Value) -> usize {
        if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            warn!(url = %url, "Response is not a FHIR Bundle");
            return 0;
        }

        let Value::Object(mut bundle) = bundle else {
            return 0;
        };
        let entries = match bundle.remove("entry") {
            None | Some(Value::Null) => return 0,
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                warn!(url = %url, "Bundle entry is not an array");
                return 0;
            }
        };

        let mut added = 0;
        for entry in entries {
            let Some(resource) = entry_resource(entry) else {
                warn!(url = %url, "Skipping bundle entry without a resource");
                continue;
            };
            let key = match resource_key(&resource) {
                Some(key) => key,
                None => {
                    warn!(url = %url, "Skipping resource without resourceType or id");
                    continue;
                }
            };
            if !self.seen.insert(key.clone()) {
                debug!(resource_type = %key.0, id = %key.1, "Dropping duplicate resource");
                continue;
            }
            self.response.push(key.0, resource);
            added += 1;
        }

        added
    }

    pub fn finish(self) -> QueryResponse {
        self.response
    }
}

/// Reconciles every response in order.
///
/// Never fails: the result holds whatever the successful responses returned.
pub fn reconcile<'a>(responses: impl IntoIterator<Item = &'a FhirResponse>) -> QueryResponse {
    let mut reconciler = ResponseReconciler::new();
    for response in responses {
        reconciler.add(response);
    }
    reconciler.finish()
}

fn entry_resource(entry: Value) -> Option<Value> {
    match entry {
        Value::Object(mut entry) => entry.remove("resource").filter(Value::is_object),
        _ => None,
    }
}

fn resource_key(resource: &Value) -> Option<(String, String)> {
    let resource_type = resource.get("resourceType")?.as_str()?;
    let id = resource.get("id")?.as_str()?;
    if resource_type.is_empty() || id.is_empty() {
        return None;
    }
    Some((resource_type.to_string(), id.to_string()))
}
