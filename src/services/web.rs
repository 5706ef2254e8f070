//! Status web server: the supervisor snapshot over HTTP.

use std::{
    future::IntoFuture,
    net::SocketAddr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use async_trait::async_trait;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    status::{StatusReader, StatusSnapshot},
    worker::{WorkerBody, WorkerContext, WorkerState},
    WorkerResult,
};

#[derive(Clone)]
pub struct StatusState {
    status: StatusReader,
    started_at: std::time::Instant,
}

impl StatusState {
    pub fn new(status: StatusReader) -> Self {
        Self {
            status,
            started_at: std::time::Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerStatusView {
    pub id: String,
    pub state: WorkerState,
    pub consecutive_failures: u32,
    pub total_restarts: u64,
    pub last_seen_secs_ago: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub workers: Vec<WorkerStatusView>,
}

impl From<&StatusSnapshot> for StatusResponse {
    fn from(snapshot: &StatusSnapshot) -> Self {
        let now = tokio::time::Instant::now();
        Self {
            workers: snapshot
                .workers
                .iter()
                .map(|worker| WorkerStatusView {
                    id: worker.id.clone(),
                    state: worker.state,
                    consecutive_failures: worker.consecutive_failures,
                    total_restarts: worker.total_restarts,
                    last_seen_secs_ago: worker
                        .last_seen_alive
                        .map(|seen| now.saturating_duration_since(seen).as_secs_f64()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: f64,
    pub uptime_secs: f64,
}

/// Routes of the status server.
pub fn build_router(state: StatusState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/health", get(api_health))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn index(State(state): State<StatusState>) -> impl IntoResponse {
    let snapshot = state.status.snapshot();
    let mut body = String::from("worker supervisor\n");
    for worker in &snapshot.workers {
        body.push_str(&format!(
            "{}: {} (failures: {}, restarts: {})\n",
            worker.id, worker.state, worker.consecutive_failures, worker.total_restarts
        ));
    }
    body
}

async fn api_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    Json(StatusResponse::from(&state.status.snapshot()))
}

async fn api_health(State(state): State<StatusState>) -> Json<HealthResponse> {
    let snapshot = state.status.snapshot();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs_f64())
        .unwrap_or_default();
    Json(HealthResponse {
        status: if snapshot.all_running() {
            "healthy"
        } else {
            "degraded"
        },
        timestamp,
        uptime_secs: state.started_at.elapsed().as_secs_f64(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

/// Worker body serving [`build_router`] on `bind`.
///
/// Heartbeats come from a ticker running next to the server, so they only show
/// that the task is still being scheduled. A server that fails ends the body
/// and is restarted as a crash; one that stops accepting connections without
/// returning is not detected.
pub struct StatusServer {
    bind: SocketAddr,
    state: StatusState,
    beat_interval: Duration,
}

impl StatusServer {
    pub fn new(bind: SocketAddr, status: StatusReader, beat_interval: Duration) -> Self {
        Self {
            bind,
            state: StatusState::new(status),
            beat_interval,
        }
    }
}

#[async_trait]
impl WorkerBody for StatusServer {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("failed to bind status server on {}", self.bind))?;
        info!(addr = %self.bind, "status server listening");

        let stop = ctx.stop_token();
        let server = axum::serve(listener, build_router(self.state.clone()))
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .into_future();

        let beats = async {
            let mut ticker = tokio::time::interval(self.beat_interval);
            loop {
                ticker.tick().await;
                ctx.beat();
            }
        };

        tokio::select! {
            result = server => result.context("status server failed")?,
            _ = beats => {}
        }
        info!(addr = %self.bind, "status server stopped");
        Ok(())
    }
}
