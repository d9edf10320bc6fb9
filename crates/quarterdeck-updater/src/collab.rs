use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use quarterdeck_core::types::{
    App, AppId, AppKinds, License, LicenseSyncOutcome, Release, ReportingInfo,
};

/// Errors produced by external collaborators (upstream source, license
/// service, deploy executor, kinds loader).
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollabResult<T> = std::result::Result<T, CollabError>;

/// Synchronizes an application's license against the upstream source.
///
/// Sync may rotate the license payload server-side (entitlement changes),
/// and a rotation can itself produce a new release — callers must reload
/// the application after a successful sync.
#[async_trait]
pub trait LicenseSync: Send + Sync {
    async fn sync(&self, app: &App, current: &License) -> CollabResult<LicenseSyncOutcome>;
}

/// The upstream release source: release discovery and archive downloads.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Releases strictly newer than `kinds.cursor` on the current channel,
    /// in ascending cursor order. `reporting` carries telemetry attribution
    /// for the requesting instance.
    async fn releases_after(
        &self,
        license: &License,
        kinds: &AppKinds,
        reporting: &ReportingInfo,
    ) -> CollabResult<Vec<Release>>;

    /// Download one release's content into `dest` (the shared staging root,
    /// already holding the previously staged tree), using `cursor` as the
    /// identity/resume token.
    async fn download_release(
        &self,
        app: &App,
        dest: &Path,
        cursor: &str,
        skip_preflights: bool,
    ) -> CollabResult<()>;
}

/// Parses a staged archive directory into structured application kinds.
pub trait KindsLoader: Send + Sync {
    fn load(&self, archive_dir: &Path) -> CollabResult<AppKinds>;
}

/// Reads `installation.json` at the root of a staged archive.
#[derive(Debug, Default)]
pub struct FsKindsLoader;

impl KindsLoader for FsKindsLoader {
    fn load(&self, archive_dir: &Path) -> CollabResult<AppKinds> {
        let path = archive_dir.join("installation.json");
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| {
            CollabError::Malformed(format!("{}: {e}", path.display()))
        })
    }
}

/// Initiates deployment of a staged sequence. Initiation only — completion
/// and failure reporting beyond initiation belong to the executor.
#[async_trait]
pub trait DeployExecutor: Send + Sync {
    async fn deploy(&self, app_id: &AppId, sequence: i64) -> CollabResult<()>;
}

/// Best-effort telemetry reporting.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Attribution metadata attached to upstream release queries.
    fn reporting_info(&self, app_id: &AppId) -> ReportingInfo;

    /// Report a staged/deployed sequence upstream. Callers treat failures
    /// as log-only.
    async fn report_app_info(
        &self,
        app_id: &AppId,
        sequence: i64,
        skip_preflights: bool,
        is_cli: bool,
    ) -> CollabResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_kinds_loader_parses_installation_json() {
        let dir = std::env::temp_dir().join(format!("qd-kinds-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("installation.json"),
            r#"{"cursor":"12","channel_id":"stable-id","channel_name":"Stable","version_label":"1.2.0"}"#,
        )
        .unwrap();

        let kinds = FsKindsLoader.load(&dir).unwrap();
        assert_eq!(kinds.cursor, "12");
        assert_eq!(kinds.channel_name, "Stable");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fs_kinds_loader_missing_file_is_io_error() {
        let dir = std::env::temp_dir().join(format!("qd-kinds-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        assert!(matches!(
            FsKindsLoader.load(&dir),
            Err(CollabError::Io(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
