//! Test fixtures for engine integration testing.

use helios_query_engine::{Concept, ConceptType, NestedQuery, SavedQuery, ValueSet};
use serde_json::{Value, json};

/// Patient id used by the records tests.
pub const PATIENT_ID: &str = "patient-1";

/// Lab code in the default saved query.
pub const LAB_CODE: &str = "24111-7";
/// Condition code in the default saved query.
pub const CONDITION_CODE: &str = "2339001";
/// Medication code in the default saved query.
pub const MEDICATION_CODE: &str = "434692";

/// A minimal resource of `resource_type` with `id`.
pub fn resource(resource_type: &str, id: &str) -> Value {
    json!({ "resourceType": resource_type, "id": id })
}

/// A search-set bundle holding `resources`.
pub fn bundle(resources: &[Value]) -> Value {
    let entries: Vec<Value> = resources
        .iter()
        .map(|resource| json!({ "resource": resource }))
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries,
    })
}

/// A patient with a name and birth date.
pub fn patient(id: &str, given: &str, family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{ "given": [given], "family": family }],
        "birthDate": "1990-01-01",
    })
}

/// A value set with one included concept.
pub fn value_set(id: &str, concept_type: ConceptType, code: &str) -> ValueSet {
    ValueSet::new(id, concept_type).with_concept(Concept::new(code, format!("{code} display")))
}

/// A selection with one lab, one condition and one medication value set.
pub fn selection() -> NestedQuery {
    let mut query = NestedQuery::new();
    query.entry("chlamydia".to_string()).or_default().extend([
        (
            "labs-vs".to_string(),
            value_set("labs-vs", ConceptType::Labs, LAB_CODE),
        ),
        (
            "conditions-vs".to_string(),
            value_set("conditions-vs", ConceptType::Conditions, CONDITION_CODE),
        ),
        (
            "medications-vs".to_string(),
            value_set("medications-vs", ConceptType::Medications, MEDICATION_CODE),
        ),
    ]);
    query
}

/// A saved query named `name` over [`selection`].
pub fn saved_query(name: &str, immunization: bool) -> SavedQuery {
    SavedQuery {
        query_id: format!("{name}-id"),
        query_name: name.to_string(),
        query_data: selection(),
        immunization,
    }
}

/// A saved query with no value sets at all.
pub fn empty_saved_query(name: &str) -> SavedQuery {
    SavedQuery {
        query_id: format!("{name}-id"),
        query_name: name.to_string(),
        query_data: NestedQuery::new(),
        immunization: false,
    }
}
