//! # helios-query-connector - HTTP surface for the FHIR query engine
//!
//! This crate exposes [`helios_query_engine`] over HTTP with
//! [Axum](https://github.com/tokio-rs/axum): the SMART JWKS that FHIR servers
//! use to verify the connector's client assertions, JSON endpoints for
//! patient discovery and patient records, and FHIR server connection tests.
//!
//! ## Features
//!
//! - **Patient discovery** by name, birth date, MRN and phone
//! - **Patient records** for a saved query, with session-local value set
//!   overrides
//! - **Combined queries** returning one search-set Bundle
//! - **SMART backend services** key pair generated on first use and served
//!   as a JWKS
//! - **Audited** entry points via `tracing`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use helios_query_connector::{AppState, ServerConfig, create_app_with_config, init_logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env();
//!     init_logging(&config.log_level);
//!
//!     let state = AppState::from_config(config.clone())?;
//!     let app = create_app_with_config(state, &config);
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Errors are returned as FHIR `OperationOutcome` resources:
//!
//! | Condition | Status | Issue code |
//! |-----------|--------|------------|
//! | Unknown server or saved query, bad input | 400 | invalid |
//! | No patient matched | 404 | not-found |
//! | Token exchange failed | 502 | security |
//! | FHIR server unreachable | 502 | transient |
//! | Store failure | 500 | exception |
//!
//! ## Architecture
//!
//! - [`config`] - Server configuration
//! - [`error`] - Error types and OperationOutcome rendering
//! - [`handlers`] - HTTP request handlers
//! - [`routing`] - Route configuration
//! - [`state`] - Shared application state

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routing;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Creates the application router with default middleware.
pub fn create_app(state: AppState) -> Router {
    let config = state.config().clone();
    create_app_with_config(state, &config)
}

/// Creates the application router with the middleware `config` asks for.
///
/// The stack is tracing, the inbound request timeout, and CORS when enabled.
pub fn create_app_with_config(state: AppState, config: &ServerConfig) -> Router {
    info!(
        jwks_url = %config.jwks_url(),
        keys_dir = %config.keys_dir.display(),
        "Creating query connector"
    );

    let router = routing::create_routes(state);

    let service_builder = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout),
        ));

    let router = if config.enable_cors {
        router.layer(build_cors_layer(config))
    } else {
        router
    };

    router.layer(service_builder)
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins == "*" {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Initializes `tracing` with an env filter.
///
/// `RUST_LOG` wins when set; otherwise both connector and engine log at
/// `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_query_connector={level},helios_query_engine={level},audit={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
