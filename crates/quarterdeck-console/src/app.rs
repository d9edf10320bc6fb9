use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use quarterdeck_core::config::QuarterdeckConfig;
use quarterdeck_store::Store;
use quarterdeck_updater::{DeployExecutor, Updater};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: QuarterdeckConfig,
    pub store: Arc<dyn Store>,
    pub updater: Updater,
    pub deployer: Arc<dyn DeployExecutor>,
}

impl AppState {
    pub fn new(
        config: QuarterdeckConfig,
        store: Arc<dyn Store>,
        updater: Updater,
        deployer: Arc<dyn DeployExecutor>,
    ) -> Self {
        Self {
            config,
            store,
            updater,
            deployer,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::health_handler))
        .route(
            "/api/v1/app/{slug}/updatecheck",
            post(crate::http::updates::app_update_check),
        )
        .route(
            "/api/v1/app/{slug}/updatecheckerspec",
            put(crate::http::updates::set_update_checker_spec),
        )
        .route(
            "/api/v1/task/update-download",
            get(crate::http::updates::update_download_status),
        )
        .route(
            "/api/v1/app/{slug}/upload",
            post(crate::http::upload::upload_existing_app),
        )
        .route(
            "/api/v1/app/{slug}/cluster/{cluster_id}/sequence/{sequence}/downstreamoutput",
            get(crate::http::downstream::get_downstream_output),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tower::ServiceExt;

    use quarterdeck_store::SqliteStore;
    use quarterdeck_updater::{FsKindsLoader, UpdateChecker};
    use quarterdeck_upstream::UpstreamClient;

    use crate::deploy_exec::StoreDeployExecutor;

    fn test_state() -> (Arc<AppState>, PathBuf) {
        let root =
            std::env::temp_dir().join(format!("qd-console-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(SqliteStore::in_memory(&root).unwrap());
        let config = QuarterdeckConfig::default();

        // The upstream client is wired but never reached by these tests.
        let upstream =
            Arc::new(UpstreamClient::new(&config.upstream, "test-instance".into()).unwrap());
        let deployer = Arc::new(StoreDeployExecutor::new(store.clone()));
        let checker = UpdateChecker::new(
            store.clone(),
            upstream.clone(),
            upstream.clone(),
            Arc::new(FsKindsLoader),
            deployer.clone(),
            upstream.clone(),
        );
        let updater = Updater::new(checker, store.clone());

        (
            Arc::new(AppState::new(config, store, updater, deployer)),
            root,
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (state, root) = test_state();
        let response = build_router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn malformed_cadence_is_rejected_with_400() {
        let (state, root) = test_state();
        state
            .store
            .create_app("sentry", "Sentry", "@default", false, "lic")
            .unwrap();

        let response = build_router(state.clone())
            .oneshot(
                Request::put("/api/v1/app/sentry/updatecheckerspec")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"updateCheckerSpec":"every blue moon"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // Nothing persisted.
        let app = state.store.get_app_from_slug("sentry").unwrap();
        assert_eq!(app.update_check_spec, "@default");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn valid_cadence_persists_and_installs_one_trigger() {
        let (state, root) = test_state();
        let app = state
            .store
            .create_app("sentry", "Sentry", "@never", false, "lic")
            .unwrap();

        let response = build_router(state.clone())
            .oneshot(
                Request::put("/api/v1/app/sentry/updatecheckerspec")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"updateCheckerSpec":"0 */1 * * *"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let loaded = state.store.get_app_from_slug("sentry").unwrap();
        assert_eq!(loaded.update_check_spec, "0 */1 * * *");
        assert_eq!(
            state.updater.registry().trigger_specs(&app.id),
            vec!["0 */1 * * *"]
        );
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn task_status_defaults_to_empty() {
        let (state, root) = test_state();
        let response = build_router(state)
            .oneshot(
                Request::get("/api/v1/task/update-download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "");
        assert_eq!(body["message"], "");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn update_check_for_unknown_app_is_404() {
        let (state, root) = test_state();
        let response = build_router(state)
            .oneshot(
                Request::post("/api/v1/app/ghost/updatecheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
