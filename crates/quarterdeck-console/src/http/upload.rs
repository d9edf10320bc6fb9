use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use quarterdeck_core::types::VersionSource;
use quarterdeck_updater::deploy::ensure_deployed;
use quarterdeck_updater::{FsKindsLoader, KindsLoader};

use crate::app::AppState;

/// Metadata part of an archive upload.
#[derive(Debug, Default, Deserialize)]
pub struct UploadMetadata {
    #[serde(default)]
    pub deploy: bool,
    #[serde(default, rename = "skipPreflights")]
    pub skip_preflights: bool,
}

/// POST /api/v1/app/{slug}/upload — multipart archive upload for an
/// existing app.
///
/// Form fields: `metadata` (JSON, see [`UploadMetadata`]) and `file`
/// (a gzipped tar of the version archive). The extracted tree must carry an
/// `installation.json`; a version record is created with source
/// "manual upload" and optionally deployed.
pub async fn upload_existing_app(
    State(state): State<Arc<AppState>>,
    UrlPath(slug): UrlPath<String>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let app = match state.store.get_app_from_slug(&slug) {
        Ok(app) => app,
        Err(e) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()})));
        }
    };

    let mut metadata = UploadMetadata::default();
    let mut archive_bytes: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": e.to_string()})),
                );
            }
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("metadata") => {
                let raw = match field.text().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": e.to_string()})),
                        );
                    }
                };
                metadata = match serde_json::from_str(&raw) {
                    Ok(m) => m,
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": format!("bad metadata: {e}")})),
                        );
                    }
                };
            }
            Some("file") => match field.bytes().await {
                Ok(bytes) => archive_bytes = Some(bytes.to_vec()),
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({"error": e.to_string()})),
                    );
                }
            },
            _ => {}
        }
    }

    let Some(archive_bytes) = archive_bytes else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing file field"})),
        );
    };

    let staging = match extract_upload(&archive_bytes) {
        Ok(dir) => dir,
        Err(e) => {
            error!(slug, error = %e, "failed to extract uploaded archive");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e})));
        }
    };

    let result = stage_upload(&state, &app.id, &staging, &metadata).await;
    let _ = std::fs::remove_dir_all(&staging);

    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"slug": app.slug}))),
        Err(e) => {
            error!(slug, error = %e, "failed to stage uploaded archive");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e})))
        }
    }
}

async fn stage_upload(
    state: &AppState,
    app_id: &quarterdeck_core::types::AppId,
    staging: &Path,
    metadata: &UploadMetadata,
) -> Result<(), String> {
    let kinds = FsKindsLoader.load(staging).map_err(|e| e.to_string())?;

    let sequence = state
        .store
        .create_version(
            app_id,
            VersionSource::ManualUpload,
            &kinds.version_label,
            staging,
        )
        .map_err(|e| e.to_string())?;

    if metadata.deploy {
        ensure_deployed(&*state.store, &*state.deployer, app_id, sequence)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Write the uploaded tarball to a scratch dir and extract it there.
fn extract_upload(archive_bytes: &[u8]) -> Result<PathBuf, String> {
    let dir = std::env::temp_dir().join(format!("quarterdeck-upload-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;

    let tarball = dir.join("upload.tar.gz");
    std::fs::write(&tarball, archive_bytes).map_err(|e| e.to_string())?;

    let output = std::process::Command::new("tar")
        .args(["xzf", &tarball.to_string_lossy()])
        .current_dir(&dir)
        .output()
        .map_err(|e| format!("failed to execute tar: {e}"))?;
    let _ = std::fs::remove_file(&tarball);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let _ = std::fs::remove_dir_all(&dir);
        return Err(format!("tar extract failed: {}", stderr.trim()));
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_parses_with_defaults() {
        let m: UploadMetadata = serde_json::from_str("{}").unwrap();
        assert!(!m.deploy);
        assert!(!m.skip_preflights);

        let m: UploadMetadata =
            serde_json::from_str(r#"{"deploy":true,"skipPreflights":true}"#).unwrap();
        assert!(m.deploy);
        assert!(m.skip_preflights);
    }
}
