// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use aegis_trust_core::{
    application::{engine::key_vault_from_spec, Repositories, TrustEngine},
    domain::clock::SystemClock,
    domain::config::{StorageBackend, TrustEngineConfig, TrustEngineSpec},
    infrastructure::db::Database,
    presentation::api::app,
};

pub async fn run(config: TrustEngineConfig) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;
    info!("Trust engine starting: name={}", config.metadata.name);

    let spec = config.spec;
    if spec.observability.metrics.enabled {
        install_metrics_exporter(&spec)?;
    }

    let repos = match spec.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; agents, keys and trust history are lost on restart");
            Repositories::in_memory()
        }
        StorageBackend::Postgres => {
            let url = spec
                .storage
                .database_url
                .as_deref()
                .context("spec.storage.database_url is required for the postgres backend")?;
            let database = Database::new(url, spec.storage.max_connections).await?;
            database.migrate().await?;
            Repositories::postgres(database.get_pool().clone())
        }
    };

    let vault = key_vault_from_spec(&spec).context("Invalid master key")?;
    let (engine, receiver) = TrustEngine::new(spec.clone(), repos, vault, Arc::new(SystemClock));

    if engine
        .bootstrap
        .run_once(&spec.bootstrap)
        .await
        .context("Bootstrap failed")?
    {
        info!("First start: bootstrap complete");
    }

    let tasks = engine.spawn_background_tasks(receiver);

    let addr = format!("{}:{}", spec.network.bind_address, spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Trust engine listening on {}", addr);

    axum::serve(listener, app(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    for task in tasks {
        task.abort();
    }
    info!("Trust engine shutting down");

    Ok(())
}

fn install_metrics_exporter(spec: &TrustEngineSpec) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", spec.network.bind_address, spec.observability.metrics.port)
        .parse()
        .context("Invalid metrics listen address")?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    metrics::gauge!("aegis_trust_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
