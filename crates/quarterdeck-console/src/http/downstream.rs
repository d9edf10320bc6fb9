use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use quarterdeck_core::types::ClusterId;

use crate::app::AppState;

/// GET /api/v1/app/{slug}/cluster/{cluster_id}/sequence/{sequence}/downstreamoutput
///
/// Captured deploy logs for one downstream target at one sequence. Returns
/// empty logs when nothing has been captured yet — the UI polls early.
pub async fn get_downstream_output(
    State(state): State<Arc<AppState>>,
    Path((slug, cluster_id, sequence)): Path<(String, String, i64)>,
) -> (StatusCode, Json<Value>) {
    let app = match state.store.get_app_from_slug(&slug) {
        Ok(app) => app,
        Err(e) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()})));
        }
    };

    match state
        .store
        .get_downstream_output(&app.id, &ClusterId::from(cluster_id), sequence)
    {
        Ok(output) => (StatusCode::OK, Json(json!({ "logs": output }))),
        Err(e) => {
            error!(slug, error = %e, "failed to read downstream output");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}
