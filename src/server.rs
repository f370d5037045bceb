//! HTTP surface serving the last published payload.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{RelabelError, Result};

/// Content type of the exposition format
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const UNAVAILABLE_BODY: &str = "# metrics temporarily unavailable\n";

const INDEX_BODY: &str = "Available endpoints:\n  GET /metrics - aggregated cadvisor metrics\n  GET /health  - server liveness probe\n";

/// Holds the published payload and serves it over HTTP
#[derive(Clone, Default)]
pub struct MetricsServer {
    payload: Arc<RwLock<Option<String>>>,
}

impl MetricsServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published payload
    pub async fn update(&self, payload: String) {
        info!("Metrics payload updated ({} bytes)", payload.len());
        *self.payload.write().await = Some(payload);
    }

    /// The currently published payload, if any
    pub async fn snapshot(&self) -> Option<String> {
        self.payload.read().await.clone()
    }

    /// Routes for `/metrics`, `/health` and the index
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .fallback(index_handler)
            .with_state(self.clone())
    }

    /// Serve until `cancel` fires
    pub async fn run(&self, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelabelError::Server(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Metrics HTTP server listening on {}", local);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| RelabelError::Server(e.to_string()))?;

        info!("Metrics HTTP server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(server): State<MetricsServer>) -> Response {
    let headers = [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)];

    match server.snapshot().await {
        Some(payload) if !payload.is_empty() => {
            debug!("Serving metrics payload ({} bytes)", payload.len());
            (StatusCode::OK, headers, payload).into_response()
        }
        _ => {
            debug!("Metrics payload unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, headers, UNAVAILABLE_BODY).into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn index_handler(uri: Uri) -> Response {
    let status = if uri.path() == "/" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        INDEX_BODY,
    )
        .into_response()
}
