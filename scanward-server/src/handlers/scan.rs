use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use scanward_core::{JobId, ScanJob, ScanRequest, ScanSummary};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct StartScanResponse {
    pub id: JobId,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// Admits a scan and answers before the scanner starts.
pub async fn start_scan(
    State(state): State<AppState>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<StartScanResponse>)> {
    let Json(request) = body?;
    let id = state.orchestrator().submit(&request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            id,
            message: "Scan started successfully".to_string(),
        }),
    ))
}

pub async fn scan_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ScanJob>> {
    let job = state.orchestrator().status(&JobId::from(id)).await?;
    Ok(Json(job))
}

pub async fn recent_scans(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> AppResult<Json<Vec<ScanSummary>>> {
    let scans = state.orchestrator().recent(query.limit).await?;
    Ok(Json(scans))
}
