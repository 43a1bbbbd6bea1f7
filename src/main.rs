// ByteGrader - autograder dispatch API.
//
// Accepts student submission archives over HTTP, routes each to an
// assignment-specific grader container with the shared workspace volume
// mounted, and surfaces the verdict via a status API.

mod api;
mod auth;
mod config;
mod engine;
mod models;
mod queue;
mod ratelimit;
mod registry;
mod workers;
mod workspace;

use anyhow::Context;
use bollard::Docker;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::Dispatcher;
use crate::queue::JobStore;
use crate::ratelimit::RateLimitManager;
use crate::workspace::Workspace;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env());

    info!("⚙️  ByteGrader API starting with configuration:");
    config.log_summary();

    // Docker must be reachable at boot; without it every job would fail.
    let docker = Docker::connect_with_local_defaults()
        .context("Failed to create Docker client")?;
    let docker_info = docker
        .info()
        .await
        .context("Failed to connect to Docker")?;
    info!(
        "🐳 Connected to Docker: {} (server version {})",
        docker_info.name.unwrap_or_default(),
        docker_info.server_version.unwrap_or_default()
    );

    config.log_security_summary();

    let workspace = Workspace::new(&config.workspace_root);
    let (store, queue_rx) = JobStore::new(config.queue_buffer_size, config.max_queue_size);
    let rate_limits = Arc::new(RateLimitManager::new(&config));

    let dispatcher = Arc::new(Dispatcher::new(
        docker,
        config.clone(),
        store.clone(),
        workspace.clone(),
    ));

    // Background services
    workers::pool::spawn(
        store.clone(),
        dispatcher,
        queue_rx,
        config.max_concurrent_jobs,
    );
    workers::janitor::spawn(store.clone(), workspace.clone(), config.clone());
    rate_limits.clone().spawn_gc();

    let state = Arc::new(api::AppState {
        config: config.clone(),
        store,
        rate_limits,
        workspace,
    });
    let app = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("🚀 ByteGrader API running on port {}", config.port);
    info!("📋 Endpoints:");
    info!("   POST /submit - Submit file for grading (returns job_id)");
    info!("   GET  /status/{{job_id}} - Check job status");
    info!("   GET  /queue - View queue status");
    info!("   GET  /config - View current configuration (admin)");
    info!("   GET  /version - Build information (admin)");
    info!("   GET  /health - Health check (no auth required)");

    list_assignments(&config).await;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("👋 ByteGrader shutdown complete.");
    Ok(())
}

/// Advisory registry read at boot: purely informational, so a broken file
/// warns instead of aborting - every submission re-reads it from disk.
async fn list_assignments(config: &Config) {
    info!("📂 Available assignments:");
    match registry::load(&config.grader_registry_path).await {
        Ok(registry) => {
            if registry.assignments.is_empty() {
                warn!("   ❌ No assignments found in registry");
                return;
            }
            for (assignment_id, assignment) in &registry.assignments {
                let status = if assignment.enabled {
                    "✅ enabled"
                } else {
                    "❌ disabled"
                };
                info!("     - {} ({}) -> {}", assignment_id, status, assignment.image);
            }
        }
        Err(e) => {
            error!("   ❌ Error reading grader registry: {}", e);
            error!(
                "   Expected registry file: {}",
                config.grader_registry_path.display()
            );
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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

    info!("🛑 Shutdown signal received.");
}
