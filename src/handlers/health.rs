use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::catalog::DigestCacheStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub catalog: DigestCacheStatus,
}

/// GET /health
///
/// Always 200; catalog staleness is reported, not treated as unhealthy,
/// because the pipeline serves with an empty digest rather than failing.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        catalog: state.chat.digest_cache().status(),
    })
}
