//! Certward Server Binary
//!
//! Runs the SSH certificate authority HTTP server.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use certward_authority::{create_router, AppState, Authority, AuthorityConfig, SshCaKeys};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let log_level = env::var("CERTWARD_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Configuration
    let port: u16 = env::var("CERTWARD_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .map_err(|e| format!("CERTWARD_PORT must be a valid port number: {}", e))?;

    let name = env::var("CERTWARD_NAME")
        .unwrap_or_else(|_| format!("certward-{}", uuid::Uuid::new_v4()));

    let config = match env::var("CERTWARD_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            AuthorityConfig::load(&PathBuf::from(path))?
        }
        Err(_) => {
            info!("CERTWARD_CONFIG not set, using default configuration");
            AuthorityConfig::default()
        }
    };

    // CA keys
    let keys = match &config.ssh {
        Some(ssh) => SshCaKeys::load_or_generate(ssh)?,
        None => SshCaKeys::default(),
    };

    let authority = Authority::new(config, keys)?;

    info!(
        name = %name,
        port = port,
        provisioners = authority.registry().len(),
        "Starting certward server"
    );

    // Create application state
    let state = Arc::new(AppState {
        authority: Arc::new(authority),
        name,
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Certward listening");

    axum::serve(listener, app).await?;
    Ok(())
}
