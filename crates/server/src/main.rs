//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! wm-engine HTTP server — thin entry point for the Axum service.
//!
//! All routing logic lives in `http::create_router`. This binary is
//! responsible only for: CLI parsing, env config loading, AppState wiring,
//! server binding, and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use wm_core::SecretKey;

use wm_server::http::{create_router, AppState, Config};

/// wm-engine HTTP server — boots the watermarking HTTP service.
#[derive(Parser)]
#[command(
    name = "wm-server",
    version = env!("CARGO_PKG_VERSION"),
    about = "wm-engine HTTP server — multi-modal content watermarking"
)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    let _cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let key = SecretKey::from_env();

    tracing::info!("wm-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Port: {}", config.port);
    tracing::info!("Registry: {}", config.registry_path.display());
    tracing::info!("Routes: POST /api/watermark, POST /api/verify, GET /healthz");

    let state = AppState {
        key: Arc::new(key),
        registry_path: Arc::new(config.registry_path),
    };

    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tracing::info!("Listening on 0.0.0.0:{}", config.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections...");
}
