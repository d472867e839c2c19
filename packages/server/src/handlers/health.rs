use axum::Json;

use crate::models::audio::HealthResponse;

#[utoipa::path(
    get,
    path = "/",
    tag = "Health",
    operation_id = "health",
    summary = "Liveness probe",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
