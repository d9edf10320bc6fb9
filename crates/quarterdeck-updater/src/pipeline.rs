use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarterdeck_core::config::UPDATE_DOWNLOAD_TASK;
use quarterdeck_core::types::{App, Release, VersionSource};
use quarterdeck_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::collab::{DeployExecutor, Reporter, UpstreamSource};
use crate::deploy::ensure_deployed;
use crate::error::{Result, UpdateError};

/// A temp staging directory with scope-bound cleanup.
///
/// Created by release discovery for synchronous archive inspection; when a
/// discovery batch is found, the guard moves into the detached pipeline
/// task, which becomes solely responsible for removal. Dropping the guard
/// removes the directory, so every early-return path cleans up.
pub struct StagingRoot {
    path: PathBuf,
}

impl StagingRoot {
    pub fn create() -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("quarterdeck-staging-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Per-release outcomes published by the detached pipeline.
///
/// The channel is optional and non-blocking (`try_send`): production wiring
/// normally runs without an observer, tests install one to await the async
/// boundary deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Staged { cursor: String, sequence: i64 },
    Failed { cursor: String },
    BatchComplete,
}

/// The detached staging pipeline for one discovery batch.
///
/// Stages releases strictly in the given (ascending cursor) order. A
/// release that fails to stage is logged and skipped — a later release's
/// success is never blocked by an earlier failure. Deploy is attempted for
/// the final release only, and the shared task status is cleared once the
/// whole batch has been processed, reopening the single-flight gate.
pub(crate) struct StagingPipeline {
    pub store: Arc<dyn Store>,
    pub upstream: Arc<dyn UpstreamSource>,
    pub deployer: Arc<dyn DeployExecutor>,
    pub reporter: Arc<dyn Reporter>,
    pub events: Option<mpsc::Sender<PipelineEvent>>,
}

impl StagingPipeline {
    pub async fn run(
        self,
        app: App,
        updates: Vec<Release>,
        staging: StagingRoot,
        deploy: bool,
        skip_preflights: bool,
        is_cli: bool,
    ) {
        let last = updates.len().saturating_sub(1);
        for (index, update) in updates.iter().enumerate() {
            match self
                .stage_one(&app, staging.path(), update, skip_preflights)
                .await
            {
                Err(e) => {
                    error!(
                        slug = %app.slug,
                        cursor = %update.cursor,
                        error = %e,
                        "failed to stage release, continuing with the next one"
                    );
                    self.emit(PipelineEvent::Failed {
                        cursor: update.cursor.clone(),
                    });
                }
                Ok(sequence) => {
                    debug!(slug = %app.slug, cursor = %update.cursor, sequence, "release staged");

                    if deploy && index == last {
                        if let Err(e) =
                            ensure_deployed(&*self.store, &*self.deployer, &app.id, sequence).await
                        {
                            error!(slug = %app.slug, sequence, error = %e, "deploy initiation failed");
                        }

                        // Usage reporting is best-effort and must never
                        // block the pipeline.
                        let reporter = Arc::clone(&self.reporter);
                        let app_id = app.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = reporter
                                .report_app_info(&app_id, sequence, skip_preflights, is_cli)
                                .await
                            {
                                debug!(app_id = %app_id, error = %e, "failed to report app info");
                            }
                        });
                    }

                    self.emit(PipelineEvent::Staged {
                        cursor: update.cursor.clone(),
                        sequence,
                    });
                }
            }
        }

        // Reopen the single-flight gate only after the last item.
        if let Err(e) = self.store.clear_task_status(UPDATE_DOWNLOAD_TASK) {
            error!(slug = %app.slug, error = %e, "failed to clear update-download status");
        }
        self.emit(PipelineEvent::BatchComplete);

        drop(staging);
    }

    async fn stage_one(
        &self,
        app: &App,
        root: &Path,
        update: &Release,
        skip_preflights: bool,
    ) -> Result<i64> {
        self.upstream
            .download_release(app, root, &update.cursor, skip_preflights)
            .await
            .map_err(UpdateError::Upstream)?;

        let sequence = self.store.create_version(
            &app.id,
            VersionSource::Release,
            &update.version_label,
            root,
        )?;
        Ok(sequence)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.try_send(event);
        }
    }
}
