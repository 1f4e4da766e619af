//! Query Connector
//!
//! Serves the FHIR query engine over HTTP.

use clap::Parser;
use helios_query_connector::{AppState, ServerConfig, create_app_with_config, init_logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        port = config.port,
        host = %config.host,
        jwks_url = %config.jwks_url(),
        "Starting query connector"
    );

    let state = AppState::from_config(config.clone())
        .map_err(|e| anyhow::anyhow!("Failed to load connector stores: {}", e))?;
    let app = create_app_with_config(state, &config);

    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
