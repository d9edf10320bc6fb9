use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use quarterdeck_core::config::UPDATE_DOWNLOAD_TASK;
use quarterdeck_updater::schedule::resolve_spec;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateCheckParams {
    #[serde(default)]
    pub deploy: bool,
    #[serde(default, rename = "skipPreflights")]
    pub skip_preflights: bool,
}

/// POST /api/v1/app/{slug}/updatecheck — user-initiated "check now".
///
/// Synchronous up to discovery: the response carries the number of
/// available updates, while staging continues detached.
pub async fn app_update_check(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(params): Query<UpdateCheckParams>,
) -> (StatusCode, Json<Value>) {
    let app = match state.store.get_app_from_slug(&slug) {
        Ok(app) => app,
        Err(e) => {
            error!(slug, error = %e, "app lookup failed");
            return (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()})));
        }
    };

    match state
        .updater
        .check_for_updates(&app.id, params.deploy, params.skip_preflights, false)
        .await
    {
        Ok(available) => (
            StatusCode::OK,
            Json(json!({"availableUpdates": available})),
        ),
        Err(e) => {
            error!(slug, error = %e, "update check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateCheckerSpecRequest {
    #[serde(rename = "updateCheckerSpec")]
    pub update_checker_spec: String,
}

/// PUT /api/v1/app/{slug}/updatecheckerspec — change the cadence.
///
/// The spec is validated before anything is persisted: a resolvable cadence
/// must parse as a cron expression. On success the schedule takes effect
/// immediately via reconfigure.
pub async fn set_update_checker_spec(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(request): Json<UpdateCheckerSpecRequest>,
) -> Response {
    let app = match state.store.get_app_from_slug(&slug) {
        Ok(app) => app,
        Err(e) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response();
        }
    };

    let spec = request.update_checker_spec.trim();
    if let Some(resolved) = resolve_spec(spec, Utc::now()) {
        if let Err(e) = croner::Cron::new(&resolved).parse() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid update checker spec {spec:?}: {e}")})),
            )
                .into_response();
        }
    }

    if let Err(e) = state.store.set_update_check_spec(&app.id, spec) {
        error!(slug, error = %e, "failed to persist update checker spec");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }

    if let Err(e) = state.updater.configure(&app.id) {
        error!(slug, error = %e, "failed to reconfigure update checks");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

/// GET /api/v1/task/update-download — the shared task-status token.
pub async fn update_download_status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<Value>) {
    match state.store.get_task_status(UPDATE_DOWNLOAD_TASK) {
        Ok(Some(status)) => (
            StatusCode::OK,
            Json(json!({"status": status.status, "message": status.message})),
        ),
        Ok(None) => (StatusCode::OK, Json(json!({"status": "", "message": ""}))),
        Err(e) => {
            error!(error = %e, "failed to read task status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        }
    }
}
