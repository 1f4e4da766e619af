//! Common test utilities for engine integration testing.
//!
//! - [`fixtures`] - FHIR bundles, resources and saved queries
//! - [`harness`] - A wired-up engine pointed at a mock FHIR server

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;
