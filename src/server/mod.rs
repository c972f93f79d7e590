//! HTTP control surface for the backup mode.
//!
//! ```text
//! GET  /       -> {"Status":"Running"}
//! POST /store  -> {"Status":"Ok"|"Error","Message":"..."}
//! ```
//!
//! Every response is JSON and gzip-compressed when the client accepts it.

mod handlers;

pub use handlers::{HandlerError, ServiceState, ServiceStatus};

use anyhow::{anyhow, Result};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tower_http::compression::predicate::SizeAbove;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use crate::backup::BackupRequest;

/// State shared by all requests.
pub struct AppState {
    request: BackupRequest,
    /// Serializes `/store` calls so two backups never interleave on disk.
    /// Held by the copy itself, not the request, so a dropped request cannot
    /// release it early.
    store_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(request: BackupRequest) -> Self {
        Self {
            request,
            store_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Builds the router for a fixed backup request.
pub fn router(request: BackupRequest) -> Router {
    Router::new()
        .route("/", handlers::liveness_route(handlers::get_state))
        .route("/store", handlers::store_route(handlers::store))
        // The JSON bodies are tiny; compress them anyway.
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(0)))
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .with_state(Arc::new(AppState::new(request)))
}

/// Backup HTTP server.
pub struct BackupServer;

impl BackupServer {
    /// Binds `addr` and serves until Ctrl-C or SIGTERM.
    pub async fn start(addr: SocketAddr, request: BackupRequest) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("failed to bind {}: {}", addr, e))?;
        info!(
            "Backup server listening on http://{} (source: '{}', destination: '{}')",
            addr,
            request.source().display(),
            request.destination().display()
        );
        Self::serve(listener, request, shutdown_signal()).await
    }

    /// Serves on an already-bound listener until `shutdown` resolves.
    pub async fn serve(
        listener: TcpListener,
        request: BackupRequest,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        axum::serve(listener, router(request))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow!("backup server failed: {}", e))?;
        info!("Backup server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => {
                warn!("cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            },
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
