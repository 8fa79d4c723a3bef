//! DBPS - Data Batch Protection Service
//!
//! Main entry point for the DBPS HTTP server: an axum application exposing
//! `/healthz`, `/statusz`, `/auth`, `/encrypt`, and `/decrypt`.

use std::panic;
use std::sync::Arc;

use dbps::api::{build_router, AppState};
use dbps::auth::ClientCredentialStore;

const DEV_JWT_SECRET_FALLBACK: &str = "dbps-dev-secret-do-not-use-in-production";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("DBPS Fatal Error:");
        eprintln!("{}", panic_info);
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!("  DBPS - Data Batch Protection Service");
    tracing::info!("  Version: {}", dbps::VERSION);
    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!(platform = std::env::consts::OS, arch = std::env::consts::ARCH, "system information");

    let jwt_secret = match std::env::var("DBPS_JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            tracing::warn!("DBPS_JWT_SECRET is not set; falling back to an insecure development secret");
            DEV_JWT_SECRET_FALLBACK.to_string()
        }
    };

    let credentials = match std::env::var("DBPS_CREDENTIALS_FILE") {
        Ok(path) => ClientCredentialStore::from_file(&path, jwt_secret)?,
        Err(_) => {
            let skip = std::env::var("DBPS_SKIP_CREDENTIAL_CHECK")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if skip {
                tracing::warn!("DBPS_SKIP_CREDENTIAL_CHECK is enabled; every client_id/api_key pair will mint a token");
            } else {
                tracing::warn!("no DBPS_CREDENTIALS_FILE configured; starting with an empty credential store");
            }
            ClientCredentialStore::with_skip_credential_check(jwt_secret, skip)
        }
    };

    let state = Arc::new(AppState { credentials });
    let app = build_router(state);

    let bind_addr = std::env::var("DBPS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str()).await?;
    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app).await?;

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!("  DBPS shutdown complete");
    tracing::info!("═══════════════════════════════════════════════════════════");
    Ok(())
}
