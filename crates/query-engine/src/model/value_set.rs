//! Value set selections: condition → value set → concept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One code/display pair within a value set.
///
/// `include` is UI state: only included concepts are compiled into searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// The code, e.g. a LOINC or SNOMED code.
    pub code: String,
    /// Human-readable display text.
    #[serde(default)]
    pub display: String,
    /// Whether the concept is selected.
    #[serde(default)]
    pub include: bool,
}

impl Concept {
    /// Creates an included concept.
    pub fn new(code: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: display.into(),
            include: true,
        }
    }

    /// Returns the concept with its inclusion flag set.
    pub fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }
}

/// Which code bucket a value set feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptType {
    /// Lab codes (Observation and DiagnosticReport searches).
    Labs,
    /// Condition codes (Encounter and Condition searches).
    Conditions,
    /// Medication codes (MedicationRequest searches).
    Medications,
    /// Any type this engine does not compile.
    #[serde(other)]
    Unknown,
}

impl ConceptType {
    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptType::Labs => "labs",
            ConceptType::Conditions => "conditions",
            ConceptType::Medications => "medications",
            ConceptType::Unknown => "unknown",
        }
    }
}

/// A named, versioned set of codes from one coding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    pub value_set_id: String,
    #[serde(default)]
    pub value_set_name: String,
    #[serde(default)]
    pub value_set_version: String,
    #[serde(default)]
    pub author: String,
    /// The coding system URI.
    #[serde(default)]
    pub system: String,
    pub dibbs_concept_type: ConceptType,
    /// Mirrors "at least one concept included"; maintained by the UI and
    /// never trusted by the compiler.
    #[serde(default)]
    pub include_value_set: bool,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

impl ValueSet {
    /// Creates an empty value set of the given type.
    pub fn new(value_set_id: impl Into<String>, concept_type: ConceptType) -> Self {
        Self {
            value_set_id: value_set_id.into(),
            value_set_name: String::new(),
            value_set_version: String::new(),
            author: String::new(),
            system: String::new(),
            dibbs_concept_type: concept_type,
            include_value_set: false,
            concepts: Vec::new(),
        }
    }

    /// Adds a concept and keeps `include_value_set` in step with it.
    pub fn with_concept(mut self, concept: Concept) -> Self {
        self.concepts.push(concept);
        self.include_value_set = self.has_included_concepts();
        self
    }

    /// Iterates over the concepts whose `include` flag is set.
    pub fn included_concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.iter().filter(|c| c.include)
    }

    /// Returns true if any concept is included.
    pub fn has_included_concepts(&self) -> bool {
        self.concepts.iter().any(|c| c.include)
    }
}

/// One saved or user-built query: condition id → value set id → value set.
pub type NestedQuery = BTreeMap<String, BTreeMap<String, ValueSet>>;

/// A persisted query definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    #[serde(default)]
    pub query_id: String,
    pub query_name: String,
    #[serde(default)]
    pub query_data: NestedQuery,
    /// Whether Immunization records are fetched for this query.
    #[serde(default)]
    pub immunization: bool,
}

/// Merges session-local value set overrides into a persisted selection.
///
/// For every value set in `saved`:
/// - no override with the same id: the persisted value set is kept;
/// - an override that still marks the value set as included: it replaces the
///   persisted one, keeping only its included concepts;
/// - an override that no longer includes the value set: the persisted value
///   set is kept.
///
/// Overrides whose id does not appear in `saved` are ignored.
pub fn reconcile_overrides(saved: &NestedQuery, overrides: &[ValueSet]) -> NestedQuery {
    let mut reconciled = NestedQuery::new();

    for (condition_id, value_sets) in saved {
        let entry = reconciled.entry(condition_id.clone()).or_default();
        for (vs_id, value_set) in value_sets {
            match overrides.iter().find(|o| &o.value_set_id == vs_id) {
                Some(over) if over.include_value_set => {
                    let mut filtered = over.clone();
                    filtered.concepts.retain(|c| c.include);
                    entry.insert(vs_id.clone(), filtered);
                }
                _ => {
                    entry.insert(vs_id.clone(), value_set.clone());
                }
            }
        }
    }

    reconciled
}
