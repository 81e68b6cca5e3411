mod metrics;
mod routes;
mod state;

use std::process;
use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use metaver_lib::{MetadataScope, StalenessWatcher};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use self::metrics::{handle_health, handle_metrics, handle_readyz, metrics, track_metrics};
use self::routes::{handle_hash_check, handle_item, handle_manifest, handle_versions};
use self::state::AppState;
use crate::config::MetaverConfig;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/readyz", get(handle_readyz))
        .route("/metrics", get(handle_metrics))
        .route("/v1/{scope}/versions", get(handle_versions))
        .route("/v1/{scope}/versions/{version}/manifest", get(handle_manifest))
        .route("/v1/{scope}/versions/{version}/items/{key}", get(handle_item))
        .route(
            "/v1/{scope}/versions/{version}/items/{key}/hash/{hash}",
            get(handle_hash_check),
        )
        .layer(middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.ok();

    info!("shutdown signal received, finishing in-flight requests");
}

/// Wait for every watcher task. Returns how many ended in a panic or were
/// cancelled.
async fn join_watchers(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "staleness watcher task failed");
            failed += 1;
        }
    }
    failed
}

pub async fn run_serve(config: MetaverConfig) {
    let coordinator = match config.build_coordinator().await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load metadata");
            process::exit(1);
        }
    };
    let tracker = Arc::new(config.build_tracker());
    metrics().generation.set(
        i64::try_from(coordinator.read().await.generation()).unwrap_or(i64::MAX),
    );

    // One watch loop per scope, all stopped by the same shutdown broadcast.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let watcher = Arc::new(
        StalenessWatcher::new(coordinator.clone(), tracker.clone(), config.poll_interval())
            .on_reload(|scope, result| metrics().record_reload(scope, result)),
    );
    let watch_handles: Vec<_> = MetadataScope::ALL
        .into_iter()
        .map(|scope| watcher.clone().spawn(scope, shutdown_tx.subscribe()))
        .collect();

    let state = Arc::new(AppState {
        coordinator,
        tracker,
    });
    let app = router(state);

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(
        %addr,
        app = %config.app.name,
        environment = ?config.app.environment,
        poll_seconds = config.watcher.poll_seconds,
        "serving metadata"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(());
    join_watchers(watch_handles).await;

    if let Err(e) = result {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("server stopped");
}
