//! Data model shared by every engine component.

mod request;
mod response;
mod server;
mod value_set;

pub use request::{FullPatientRequest, PatientDiscoveryRequest, PatientRecordsRequest};
pub use response::QueryResponse;
pub use server::{AUTHORIZATION_HEADER, AuthMethod, FhirServerConfig};
pub use value_set::{
    Concept, ConceptType, NestedQuery, SavedQuery, ValueSet, reconcile_overrides,
};
