use std::sync::Arc;

use quarterdeck_core::types::AppId;
use quarterdeck_store::Store;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::checker::UpdateChecker;
use crate::error::Result;
use crate::registry::JobRegistry;

/// The update orchestrator: one long-lived instance per process, owning the
/// job registry and the shared checker.
///
/// Must be constructed inside a Tokio runtime — it spawns the tick consumer
/// that routes scheduler fires into release discovery.
pub struct Updater {
    registry: Arc<JobRegistry>,
    checker: Arc<UpdateChecker>,
    shutdown_tx: watch::Sender<bool>,
}

impl Updater {
    pub fn new(checker: UpdateChecker, store: Arc<dyn Store>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fired_tx, mut fired_rx) = mpsc::channel::<AppId>(64);

        let checker = Arc::new(checker);
        let registry = Arc::new(JobRegistry::new(store, fired_tx, shutdown_rx));

        // Tick consumer: every scheduled fire becomes a deploy=false check.
        // Each tick runs on its own task and all errors end here, in logs —
        // a failing check must never take down the consumer or the timers.
        let router_checker = Arc::clone(&checker);
        tokio::spawn(async move {
            while let Some(app_id) = fired_rx.recv().await {
                let checker = Arc::clone(&router_checker);
                tokio::spawn(async move {
                    match checker.check_for_updates(&app_id, false, false, false).await {
                        Ok(n) if n > 0 => {
                            debug!(app_id = %app_id, available = n, "updates found for app")
                        }
                        Ok(_) => debug!(app_id = %app_id, "no updates found for app"),
                        Err(e) => error!(app_id = %app_id, error = %e, "failed to check updates for app"),
                    }
                });
            }
        });

        Self {
            registry,
            checker,
            shutdown_tx,
        }
    }

    /// Bootstrap schedules for all installed, non-airgapped applications.
    pub fn start(&self) -> Result<()> {
        self.registry.start()
    }

    /// (Re)install the schedule for one application. Call whenever its
    /// cadence changes.
    pub fn configure(&self, app_id: &AppId) -> Result<()> {
        self.registry.configure(app_id)
    }

    /// Halt scheduled checks for one application.
    pub fn stop(&self, app_id: &AppId) {
        self.registry.stop(app_id)
    }

    /// Synchronous update check, usable from the scheduler and from direct
    /// "check now" actions.
    pub async fn check_for_updates(
        &self,
        app_id: &AppId,
        deploy: bool,
        skip_preflights: bool,
        is_cli: bool,
    ) -> Result<i64> {
        self.checker
            .check_for_updates(app_id, deploy, skip_preflights, is_cli)
            .await
    }

    /// The registry, for schedule introspection.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Cooperatively stop all scheduling tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
