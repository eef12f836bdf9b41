// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use relational_authn::{
    api::router,
    config::{AuthConfig, LogFormat, ServerConfig},
    state::AppState,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn watch_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() {
    let server = ServerConfig::from_env().expect("Invalid server configuration");
    init_tracing(server.log_format);

    let config = AuthConfig::from_env().expect("Invalid authentication configuration");
    info!(
        algorithm = %config.algorithm,
        keyring = %config.keyring,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        persistent_cache = config.cache_dir.is_some(),
        external_jwks = config.jwks_uri.is_some(),
        "Loaded authentication configuration"
    );

    // Key acquisition failures are fatal.
    let state = AppState::from_config(config)
        .await
        .expect("Failed to initialize token key custody");
    let app = router(state);

    let addr = server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    info!(%addr, "Relational Authn listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_shutdown(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .expect("HTTP server failed");
}
