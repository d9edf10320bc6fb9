use std::sync::Arc;

use chrono::Utc;
use quarterdeck_core::config::UPDATE_DOWNLOAD_TASK;
use quarterdeck_core::types::AppId;
use quarterdeck_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::collab::{DeployExecutor, KindsLoader, LicenseSync, Reporter, UpstreamSource};
use crate::deploy::ensure_deployed;
use crate::error::{Result, UpdateError};
use crate::pipeline::{PipelineEvent, StagingPipeline, StagingRoot};

/// Release discovery: the synchronous core of an update check.
///
/// One instance is shared by the scheduler's tick consumer and by direct
/// "check now" callers. The single-flight gate (the shared
/// `"update-download"` task status) serializes discovery batches across the
/// whole installation — deliberately coarse, not per-application.
pub struct UpdateChecker {
    store: Arc<dyn Store>,
    license: Arc<dyn LicenseSync>,
    upstream: Arc<dyn UpstreamSource>,
    kinds: Arc<dyn KindsLoader>,
    deployer: Arc<dyn DeployExecutor>,
    reporter: Arc<dyn Reporter>,
    /// Observer for detached-pipeline outcomes; installed by tests.
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl UpdateChecker {
    pub fn new(
        store: Arc<dyn Store>,
        license: Arc<dyn LicenseSync>,
        upstream: Arc<dyn UpstreamSource>,
        kinds: Arc<dyn KindsLoader>,
        deployer: Arc<dyn DeployExecutor>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            store,
            license,
            upstream,
            kinds,
            deployer,
            reporter,
            events: None,
        }
    }

    /// Install a pipeline-event observer. The channel is fed with
    /// `try_send`, so a full or dropped receiver never blocks staging.
    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Check (and stage) the latest updates for one application.
    ///
    /// Returns the number of available updates. Staging runs detached: when
    /// updates are found this returns immediately after spawning the
    /// pipeline, and the shared task status stays "running" until the
    /// pipeline finishes its last item.
    ///
    /// With `deploy` set and no updates available, the latest staged
    /// sequence is re-asserted against the primary downstream target —
    /// this recovers a fleet left mid-deploy by a restart.
    #[instrument(skip(self), fields(app_id = %app_id, deploy, skip_preflights, is_cli))]
    pub async fn check_for_updates(
        &self,
        app_id: &AppId,
        deploy: bool,
        skip_preflights: bool,
        is_cli: bool,
    ) -> Result<i64> {
        // Single-flight gate: one update-download batch per installation.
        if let Some(status) = self.store.get_task_status(UPDATE_DOWNLOAD_TASK)? {
            if status.status == "running" {
                debug!("update-download is already running, not starting a new one");
                return Ok(0);
            }
        }
        self.store.clear_task_status(UPDATE_DOWNLOAD_TASK)?;

        let app = self.store.get_app(app_id)?;

        // Sync the license; rotation is persisted even when no release
        // results from it.
        let current_license = self.store.latest_license(&app.id)?;
        let outcome = self
            .license
            .sync(&app, &current_license)
            .await
            .map_err(UpdateError::LicenseSync)?;
        self.store.put_license(&outcome.license)?;

        // Reload — license sync may have created a new release.
        let app = self.store.get_app(app_id)?;

        // Materialize the current version's archive; its kinds supply the
        // cursor/channel identity for the upstream query.
        let staging = StagingRoot::create()?;
        self.store
            .get_version_archive(&app.id, app.current_sequence, staging.path())?;
        let kinds = self.kinds.load(staging.path()).map_err(UpdateError::Kinds)?;

        let license = self.store.latest_license(&app.id)?;
        let reporting = self.reporter.reporting_info(&app.id);
        let updates = self
            .upstream
            .releases_after(&license, &kinds, &reporting)
            .await
            .map_err(UpdateError::Upstream)?;

        self.store.set_last_update_check_at(&app.id, Utc::now())?;

        if updates.is_empty() {
            if !deploy {
                return Ok(0);
            }

            // Re-assert that the latest staged version is the deployed one.
            let versions = self.store.list_versions(&app.id)?;
            let latest = versions.last().ok_or_else(|| UpdateError::NoVersions {
                app_id: app.id.to_string(),
            })?;
            ensure_deployed(&*self.store, &*self.deployer, &app.id, latest.sequence).await?;
            return Ok(0);
        }

        let available = updates.len() as i64;

        // Persist the running status before spawning, so a near-simultaneous
        // caller cannot also observe "not running" and start a second batch.
        self.store.set_task_status(
            UPDATE_DOWNLOAD_TASK,
            &format!("{available} Updates available..."),
            "running",
        )?;

        let pipeline = StagingPipeline {
            store: Arc::clone(&self.store),
            upstream: Arc::clone(&self.upstream),
            deployer: Arc::clone(&self.deployer),
            reporter: Arc::clone(&self.reporter),
            events: self.events.clone(),
        };
        // Ownership of the staging root moves into the detached task.
        tokio::spawn(pipeline.run(app, updates, staging, deploy, skip_preflights, is_cli));

        Ok(available)
    }
}
