//! # helios-query-engine - FHIR Query Compilation & Execution
//!
//! This crate turns a user-curated selection of clinical value sets into FHIR
//! searches, runs them concurrently against a remote FHIR server, and merges
//! the results into one deduplicated response. It is the engine behind the
//! public-health query connector.
//!
//! ## Pipeline
//!
//! 1. **Compile** a [`NestedQuery`] (condition → value set → concept) into one
//!    search per resource type with [`CompiledQuery::compile`].
//! 2. **Authenticate** with the server's configured [`AuthMethod`]; bearer
//!    tokens are cached per server by the [`CredentialResolver`].
//! 3. **Execute** the searches through a [`FhirClient`]: form-encoded
//!    `_search` POSTs, except Immunization which is a GET.
//! 4. **Reconcile** the search-set bundles into a [`QueryResponse`] with
//!    [`reconcile`].
//!
//! [`QueryExecutionService`] composes all four behind the [`QueryService`]
//! trait.
//!
//! ## Authentication
//!
//! | `authType` | Credential |
//! |------------|------------|
//! | `none` | custom headers only |
//! | `basic` | static bearer token |
//! | `client_credentials` | OAuth2 client-credentials grant with a client secret |
//! | `SMART` | client-credentials grant with an RS384 JWT assertion |
//! | `mutual-tls` | client certificate presented in the TLS handshake |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use helios_query_engine::{
//!     ClientOptions, FhirClientRegistry, InMemorySavedQueryStore, InMemoryServerConfigStore,
//!     PatientRecordsRequest, QueryExecutionService, QueryService, SmartKeyStore,
//! };
//!
//! let options = ClientOptions::default();
//! let keys = Arc::new(SmartKeyStore::new(&options.keys_dir, &options.jwks_url));
//! let servers = Arc::new(InMemoryServerConfigStore::from_json_file("servers.json")?);
//! let queries = Arc::new(InMemorySavedQueryStore::from_json_file("queries.json")?);
//!
//! let registry = Arc::new(FhirClientRegistry::new(servers, options, keys));
//! let service = QueryExecutionService::new(registry, queries);
//!
//! let response = service
//!     .patient_records_query(
//!         &PatientRecordsRequest {
//!             fhir_server: "HELIOS".into(),
//!             patient_id: "1234".into(),
//!             query_name: "Chlamydia case investigation".into(),
//!         },
//!         None,
//!     )
//!     .await?;
//! println!("{}", response.to_bundle());
//! ```
//!
//! ## Architecture
//!
//! - [`model`] - Value sets, server configuration, requests and responses
//! - [`compiler`] - Value set selection to FHIR search descriptors
//! - [`auth`] - Credential resolution and SMART signing keys
//! - [`client`] - Authenticated HTTP access to one FHIR server
//! - [`registry`] - One shared client per configured server
//! - [`reconciler`] - Bundle parsing and de-duplication
//! - [`execution`] - The orchestrated entry points
//! - [`audit`] - Audit wrapping of the entry points
//! - [`store`] - Configuration and saved-query store contracts
//! - [`error`] - Error types

pub mod audit;
pub mod auth;
pub mod client;
pub mod compiler;
pub mod config;
pub mod error;
pub mod execution;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod store;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, AuditedQueryService, TracingAuditSink};
pub use auth::{CredentialResolver, CredentialState, ResolvedCredential, SmartKeyStore};
pub use client::{ConnectionTestResult, FhirClient, FhirResponse};
pub use compiler::{CompiledQuery, ResourceQueryKey, SearchMethod, SearchRequest};
pub use config::ClientOptions;
pub use error::{
    AuthenticationError, ConfigurationError, ErrorKind, QueryError, QueryResult, TransportError,
};
pub use execution::{QueryExecutionService, QueryService};
pub use model::{
    AuthMethod, Concept, ConceptType, FhirServerConfig, FullPatientRequest, NestedQuery,
    PatientDiscoveryRequest, PatientRecordsRequest, QueryResponse, SavedQuery, ValueSet,
};
pub use reconciler::{ResponseReconciler, reconcile};
pub use registry::FhirClientRegistry;
pub use store::{
    CachedServerConfigStore, InMemorySavedQueryStore, InMemoryServerConfigStore, SavedQueryStore,
    ServerConfigStore,
};
