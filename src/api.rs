// src/api.rs
//! Operational HTTP surface: liveness, run status, manual trigger, metrics.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::extract::{RunController, RunState, RunSummary};
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
}

pub fn router(controller: Arc<RunController>, metrics: Option<&Metrics>) -> Router {
    let state = AppState { controller };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/runs", post(trigger_run))
        .with_state(state);
    match metrics {
        Some(m) => app.merge(m.router()),
        None => app,
    }
}

#[derive(Serialize)]
struct StatusOut {
    state: RunState,
    running: bool,
    sources: Vec<String>,
    last_run: Option<RunSummary>,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let ctl = &state.controller;
    Json(StatusOut {
        state: ctl.state(),
        running: ctl.is_running(),
        sources: ctl.config().sources.iter().map(|s| s.name.clone()).collect(),
        last_run: ctl.last_summary(),
    })
}

#[derive(Serialize)]
struct TriggerOut {
    accepted: bool,
    reason: &'static str,
}

async fn trigger_run(State(state): State<AppState>) -> Response {
    let ctl = Arc::clone(&state.controller);
    if ctl.shutdown_token().is_cancelled() {
        let body = TriggerOut {
            accepted: false,
            reason: "shutting down",
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    if ctl.is_running() {
        let body = TriggerOut {
            accepted: false,
            reason: "run in progress",
        };
        return (StatusCode::CONFLICT, Json(body)).into_response();
    }

    info!("manual run requested");
    tokio::spawn(async move {
        if let Err(e) = ctl.tick().await {
            warn!(error = %e, "manual run failed");
        }
    });
    let body = TriggerOut {
        accepted: true,
        reason: "started",
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}
