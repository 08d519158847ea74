//! Health endpoint.

use axum::Json;
use axum::extract::State;

use super::AppState;
use crate::health::HealthSnapshot;

/// Returns the current [`HealthSnapshot`] as JSON. Always 200, whatever the
/// lifecycle phase; the phase is in the `status` field.
pub async fn health_handler(State(app_state): State<AppState>) -> Json<HealthSnapshot> {
    Json(app_state.health().snapshot())
}
