pub mod config;
mod error;
mod metrics;
mod routes;
mod state;

use std::io::ErrorKind;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use wapb_lib::{FileGroup, Link, Text};

use self::config::WapbConfig;
use self::metrics::{handle_metrics, track_metrics};
use self::routes::{
    handle_create, handle_create_manual, handle_delete, handle_delete_group, handle_get,
    handle_get_file, handle_info, handle_list, handle_ping, handle_upload,
};
pub use self::state::AppState;

/// Largest request body accepted, uploads included.
pub const BODY_LIMIT: usize = 64 * 1024 * 1024;

/// The resource routes, mounted both at the root and under `/api/v1`.
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/text", get(handle_list::<Text>).post(handle_create::<Text>))
        .route(
            "/text/{id}",
            get(handle_get::<Text>)
                .put(handle_create_manual)
                .delete(handle_delete::<Text>),
        )
        .route("/link", get(handle_list::<Link>).post(handle_create::<Link>))
        .route(
            "/link/{id}",
            get(handle_get::<Link>)
                .put(handle_create_manual)
                .delete(handle_delete::<Link>),
        )
        .route(
            "/file",
            get(handle_list::<FileGroup>).post(handle_create::<FileGroup>),
        )
        .route(
            "/file/{id}",
            get(handle_get::<FileGroup>)
                .put(handle_create_manual)
                .delete(handle_delete_group),
        )
        .route("/file/{id}/upload", post(handle_upload))
        .route("/file/{id}/{fid}", get(handle_get_file))
        .route("/info/{kind}", get(handle_info))
}

pub fn build_router(state: Arc<AppState>, static_dir: Option<&str>) -> Router {
    let api = api_routes();
    let mut app = Router::new()
        .route("/ping", get(handle_ping))
        .route("/metrics", get(handle_metrics))
        .nest("/api/v1", api.clone())
        .merge(api);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// `host:port`, bracketing bare IPv6 literals.
fn listen_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Bind one listener per hostname. A later address already taken is assumed
/// to be covered by an earlier dual-stack socket.
async fn bind_all(hostnames: &[String], port: u16) -> Vec<TcpListener> {
    let mut listeners = Vec::new();
    for host in hostnames {
        let addr = listen_addr(host, port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "listening");
                listeners.push(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse && !listeners.is_empty() => {
                tracing::warn!(%addr, "address in use, assuming an earlier listener covers it");
            }
            Err(e) => {
                tracing::error!(%addr, error = %e, "failed to bind");
                process::exit(1);
            }
        }
    }
    listeners
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
}

/// Purge expired records every `every` until shutdown.
async fn sweep_expired(state: Arc<AppState>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    // the first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match state.service.storage().purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "removed expired records"),
            Err(e) => tracing::warn!(error = %e, "expired-record sweep failed"),
        }
    }
}

pub async fn run_serve(config: WapbConfig) {
    let server = config.server;

    let state = match AppState::open(&server) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "failed to open storage");
            process::exit(1);
        }
    };

    let app = build_router(Arc::clone(&state), server.static_dir.as_deref());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if server.sweep_interval_secs > 0 {
        tokio::spawn(sweep_expired(
            Arc::clone(&state),
            Duration::from_secs(server.sweep_interval_secs),
            shutdown_rx.clone(),
        ));
    }

    let listeners = bind_all(&server.hostnames, server.port).await;
    if listeners.is_empty() {
        tracing::error!("no hostnames configured to listen on");
        process::exit(1);
    }

    let mut servers = JoinSet::new();
    for listener in listeners {
        let app = app.clone();
        let mut stop = shutdown_rx.clone();
        servers.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.changed().await;
                })
                .await
        });
    }

    // the first listener failure or an external signal stops everything
    tokio::select! {
        _ = shutdown_signal() => tracing::info!("shutdown signal received, finishing in-flight requests"),
        Some(res) = servers.join_next() => match res {
            Ok(Ok(())) => tracing::warn!("listener stopped unexpectedly"),
            Ok(Err(e)) => tracing::error!(error = %e, "listener failed"),
            Err(e) => tracing::error!(error = %e, "listener task panicked"),
        },
    }

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(server.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while servers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(grace_secs = server.shutdown_grace_secs, "in-flight requests cut off");
        servers.abort_all();
    }

    if let Err(e) = state.service.storage().flush().await {
        tracing::error!(error = %e, "failed to flush storage");
    }
    tracing::info!("server stopped");
}
