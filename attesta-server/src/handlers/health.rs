//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" when no trust material is loaded
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub rp_id: String,
    pub metadata_statements: usize,
    pub toc_entries: usize,
    pub fallback_anchors: usize,
    pub pending_ceremonies: usize,
    /// `nextUpdate` of each ingested TOC source
    pub toc_next_updates: Vec<String>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let trust = state.trust.stats();
    let status = if trust.metadata_statements + trust.toc_entries + trust.fallback_anchors > 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        service: "attesta-server",
        rp_id: state.fido2.rp_id.clone(),
        metadata_statements: trust.metadata_statements,
        toc_entries: trust.toc_entries,
        fallback_anchors: trust.fallback_anchors,
        pending_ceremonies: state.ceremonies.stats().pending,
        toc_next_updates: state
            .trust
            .next_updates()
            .into_iter()
            .map(|(_, next_update)| next_update)
            .collect(),
    })
}
