//! Route configuration for the query connector.

pub mod api_routes;

pub use api_routes::create_routes;
