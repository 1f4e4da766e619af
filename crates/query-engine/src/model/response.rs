//! The aggregated result of one execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Resources grouped by `resourceType`.
///
/// Types with no results are absent; [`QueryResponse::get`] treats absent and
/// empty the same way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryResponse {
    resources: BTreeMap<String, Vec<Value>>,
}

impl QueryResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources of one type, empty if none were returned.
    pub fn get(&self, resource_type: &str) -> &[Value] {
        self.resources
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Appends a resource under its type.
    pub fn push(&mut self, resource_type: impl Into<String>, resource: Value) {
        self.resources
            .entry(resource_type.into())
            .or_default()
            .push(resource);
    }

    /// Replaces every resource of one type. An empty list removes the key.
    pub fn insert(&mut self, resource_type: impl Into<String>, resources: Vec<Value>) {
        let resource_type = resource_type.into();
        if resources.is_empty() {
            self.resources.remove(&resource_type);
        } else {
            self.resources.insert(resource_type, resources);
        }
    }

    /// Resource types present, in sorted order.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Number of resources per type.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.resources
            .iter()
            .map(|(ty, list)| (ty.clone(), list.len()))
            .collect()
    }

    /// Total number of resources.
    pub fn total(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Renders the response as a FHIR `searchset` Bundle.
    pub fn to_bundle(&self) -> Value {
        let entries: Vec<Value> = self
            .resources
            .values()
            .flatten()
            .map(|resource| json!({ "resource": resource }))
            .collect();

        json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": entries.len(),
            "entry": entries,
        })
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<Value>> {
        self.resources
    }
}

impl From<BTreeMap<String, Vec<Value>>> for QueryResponse {
    fn from(resources: BTreeMap<String, Vec<Value>>) -> Self {
        let mut response = QueryResponse::new();
        for (ty, list) in resources {
            response.insert(ty, list);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_type_reads_as_empty() {
        let response = QueryResponse::new();
        assert!(response.get("Observation").is_empty());
    }

    #[test]
    fn test_insert_empty_removes_key() {
        let mut response = QueryResponse::new();
        response.push("Observation", json!({"resourceType": "Observation", "id": "o1"}));
        response.insert("Observation", Vec::new());
        assert!(response.is_empty());
    }

    #[test]
    fn test_to_bundle_counts_every_resource() {
        let mut response = QueryResponse::new();
        response.push("Patient", json!({"resourceType": "Patient", "id": "p1"}));
        response.push("Observation", json!({"resourceType": "Observation", "id": "o1"}));
        response.push("Observation", json!({"resourceType": "Observation", "id": "o2"}));

        let bundle = response.to_bundle();
        assert_eq!(bundle["resourceType"], "Bundle");
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 3);
        assert_eq!(bundle["entry"].as_array().unwrap().len(), 3);
        assert_eq!(response.counts()["Observation"], 2);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut response = QueryResponse::new();
        response.push("Condition", json!({"id": "c1"}));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"Condition": [{"id": "c1"}]}));
    }
}
