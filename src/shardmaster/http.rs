//! Admin HTTP endpoints
//!
//! - `GET /health/live`: process is up
//! - `GET /health/ready`: first assignment pass finished (503 before)
//! - `GET /hosts`: current live host set

use crate::common::{format_timestamp_millis, Error, Result};
use crate::shardmaster::hosts::CheckpointedHostsReloader;
use crate::shardmaster::refresher::Readiness;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub readiness: Readiness,
    pub hosts: Arc<CheckpointedHostsReloader>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/hosts", get(hosts))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AdminState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initial assignment in progress" })),
        )
    }
}

async fn hosts(State(state): State<AdminState>) -> impl IntoResponse {
    let live = state.hosts.hosts();
    let hosts: Vec<String> = live.hosts.iter().map(ToString::to_string).collect();
    Json(json!({
        "count": hosts.len(),
        "loaded_at": format_timestamp_millis(live.loaded_at),
        "hosts": hosts,
    }))
}

/// Running admin listener
pub struct AdminServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<std::io::Result<()>>,
}

impl AdminServer {
    pub async fn spawn(addr: SocketAddr, state: AdminState) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let app = create_router(state);
        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        tracing::info!("Admin HTTP listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown,
            join,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.join
            .await
            .map_err(|e| Error::Internal(format!("admin server task failed: {}", e)))??;
        Ok(())
    }
}
