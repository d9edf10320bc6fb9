use std::path::Path;

use chrono::{DateTime, Utc};
use quarterdeck_core::types::{
    App, AppId, AppVersion, ClusterId, Downstream, DownstreamOutput, License, TaskStatus,
    VersionSource,
};

use crate::error::Result;

/// Narrow data-access contract for the admin console.
///
/// Implementations must be `Send + Sync`: the update orchestrator calls the
/// store from scheduler tasks and from detached staging pipelines
/// concurrently. Methods are synchronous — the SQLite implementation holds
/// a connection mutex for the duration of each call, and callers must not
/// hold any of their own locks across a store call.
pub trait Store: Send + Sync {
    // ── applications ────────────────────────────────────────────────────

    /// All installed applications, airgapped ones included.
    fn list_installed_apps(&self) -> Result<Vec<App>>;

    fn get_app(&self, app_id: &AppId) -> Result<App>;

    fn get_app_from_slug(&self, slug: &str) -> Result<App>;

    /// Register a new application. The app starts with no versions
    /// (`current_sequence` is -1 until the first version is created).
    fn create_app(
        &self,
        slug: &str,
        name: &str,
        update_check_spec: &str,
        is_airgap: bool,
        license_payload: &str,
    ) -> Result<App>;

    fn set_update_check_spec(&self, app_id: &AppId, spec: &str) -> Result<()>;

    fn set_last_update_check_at(&self, app_id: &AppId, when: DateTime<Utc>) -> Result<()>;

    // ── version records ─────────────────────────────────────────────────

    /// Version records in ascending sequence order.
    fn list_versions(&self, app_id: &AppId) -> Result<Vec<AppVersion>>;

    fn get_version(&self, app_id: &AppId, sequence: i64) -> Result<AppVersion>;

    /// Assign the next sequence for `app_id`, copy `staging_dir` into the
    /// durable archive root, record the version, and advance the
    /// application's `current_sequence`. Returns the assigned sequence.
    fn create_version(
        &self,
        app_id: &AppId,
        source: VersionSource,
        version_label: &str,
        staging_dir: &Path,
    ) -> Result<i64>;

    /// Materialize the durable archive for (app, sequence) into `dest`.
    fn get_version_archive(&self, app_id: &AppId, sequence: i64, dest: &Path) -> Result<()>;

    // ── downstream targets ──────────────────────────────────────────────

    /// Downstream targets in stable order; the first entry is the primary.
    fn list_downstreams(&self, app_id: &AppId) -> Result<Vec<Downstream>>;

    fn create_downstream(&self, app_id: &AppId, cluster_id: &ClusterId, name: &str) -> Result<()>;

    /// The sequence this target currently considers deployed.
    fn current_parent_sequence(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
    ) -> Result<Option<i64>>;

    fn set_parent_sequence(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
    ) -> Result<()>;

    // ── shared task status ──────────────────────────────────────────────

    fn get_task_status(&self, name: &str) -> Result<Option<TaskStatus>>;

    fn set_task_status(&self, name: &str, message: &str, status: &str) -> Result<()>;

    fn clear_task_status(&self, name: &str) -> Result<()>;

    // ── licenses ────────────────────────────────────────────────────────

    /// The most recently updated license for an application.
    fn latest_license(&self, app_id: &AppId) -> Result<License>;

    fn put_license(&self, license: &License) -> Result<()>;

    // ── downstream output ───────────────────────────────────────────────

    fn get_downstream_output(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
    ) -> Result<DownstreamOutput>;

    fn put_downstream_output(
        &self,
        app_id: &AppId,
        cluster_id: &ClusterId,
        sequence: i64,
        output: &DownstreamOutput,
    ) -> Result<()>;
}
