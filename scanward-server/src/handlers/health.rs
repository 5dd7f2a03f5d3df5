use axum::{Json, extract::State};
use serde::Serialize;

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub workers: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub subscribers: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.orchestrator().stats();
    Json(HealthResponse {
        status: "ok",
        workers: stats.dispatcher.workers,
        in_flight: stats.dispatcher.in_flight,
        queued: stats.dispatcher.queued,
        subscribers: stats.subscribers,
    })
}
