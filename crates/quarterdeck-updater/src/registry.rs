use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use croner::Cron;
use quarterdeck_core::types::AppId;
use quarterdeck_store::Store;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Result, UpdateError};
use crate::schedule::resolve_spec;

/// One installed trigger for a scheduled job.
struct TriggerEntry {
    id: u64,
    spec: String,
    cron: Cron,
}

/// A per-application scheduling job. The underlying task is reused across
/// reconfigurations: replacing the cadence swaps the trigger entries in
/// place and wakes the task, and `stop` only pauses it.
struct ScheduledJob {
    entries: Arc<Mutex<Vec<TriggerEntry>>>,
    /// Wakes the job task after entries changed.
    changed: Arc<Notify>,
    /// `false` pauses the task without tearing it down.
    running_tx: watch::Sender<bool>,
}

/// Thread-safe mapping from application id to its active scheduled job.
///
/// Fired ticks are forwarded through an mpsc channel (never blocking the
/// timer task); the consumer invokes release discovery and owns error
/// logging, so a tick can never crash the scheduler or block future ticks.
pub struct JobRegistry {
    store: Arc<dyn Store>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    fired_tx: mpsc::Sender<AppId>,
    shutdown_rx: watch::Receiver<bool>,
    next_entry_id: AtomicU64,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        fired_tx: mpsc::Sender<AppId>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            jobs: Mutex::new(HashMap::new()),
            fired_tx,
            shutdown_rx,
            next_entry_id: AtomicU64::new(1),
        }
    }

    /// Bootstrap schedules for all installed, non-airgapped applications.
    ///
    /// Per-app configure failures are logged and skipped — one app with a
    /// broken cadence must not prevent the rest from being scheduled.
    pub fn start(&self) -> Result<()> {
        debug!("starting update checker");
        let apps = self.store.list_installed_apps()?;
        for app in apps {
            if app.is_airgap {
                continue;
            }
            if let Err(e) = self.configure(&app.id) {
                error!(slug = %app.slug, error = %e, "failed to configure update checks for app");
            }
        }
        Ok(())
    }

    /// Install, replace, or disable the schedule for one application.
    ///
    /// No-op for airgapped apps. A disabled cadence (`"@never"`/empty)
    /// stops any existing job. Otherwise the cadence is resolved and parsed
    /// first — a malformed expression errors out here and leaves the prior
    /// schedule untouched — and only then is the registry mutated, entirely
    /// under the registry lock so two concurrent `configure` calls cannot
    /// interleave their entry swaps.
    pub fn configure(&self, app_id: &AppId) -> Result<()> {
        let app = self.store.get_app(app_id)?;
        if app.is_airgap {
            return Ok(());
        }

        debug!(slug = %app.slug, "configure update checker for app");

        let Some(spec) = resolve_spec(&app.update_check_spec, Utc::now()) else {
            self.stop(app_id);
            return Ok(());
        };

        let cron = Cron::new(&spec)
            .parse()
            .map_err(|e| UpdateError::InvalidSchedule {
                spec: spec.clone(),
                reason: e.to_string(),
            })?;

        let entry = TriggerEntry {
            id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
            spec,
            cron,
        };

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get(app_id.as_str()) {
            // Reuse the existing job: swap entries atomically, then resume.
            {
                let mut entries = job.entries.lock().unwrap();
                entries.clear();
                entries.push(entry);
            }
            let _ = job.running_tx.send(true);
            job.changed.notify_one();
        } else {
            let entries = Arc::new(Mutex::new(vec![entry]));
            let changed = Arc::new(Notify::new());
            let (running_tx, running_rx) = watch::channel(true);

            tokio::spawn(run_job(
                app.id.clone(),
                app.slug.clone(),
                Arc::clone(&entries),
                Arc::clone(&changed),
                running_rx,
                self.shutdown_rx.clone(),
                self.fired_tx.clone(),
            ));

            jobs.insert(
                app_id.as_str().to_string(),
                ScheduledJob {
                    entries,
                    changed,
                    running_tx,
                },
            );
            info!(slug = %app.slug, "update-check job installed");
        }

        Ok(())
    }

    /// Pause the job for an application. Idempotent; no-op when no job
    /// exists. The registry entry is kept so a later `configure` reuses it.
    pub fn stop(&self, app_id: &AppId) {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(app_id.as_str()) {
            Some(job) => {
                let _ = job.running_tx.send(false);
                job.changed.notify_one();
            }
            None => debug!(app_id = %app_id, "no update-check job found for app"),
        }
    }

    /// The cron specs currently installed for an application. Empty when no
    /// job exists or the job is paused.
    pub fn trigger_specs(&self, app_id: &AppId) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get(app_id.as_str()) else {
            return Vec::new();
        };
        if !*job.running_tx.borrow() {
            return Vec::new();
        }
        let specs = job
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.spec.clone())
            .collect();
        specs
    }

    /// True when the application has an installed, unpaused job.
    pub fn is_running(&self, app_id: &AppId) -> bool {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(app_id.as_str())
            .map(|job| *job.running_tx.borrow())
            .unwrap_or(false)
    }
}

/// The long-lived timer task for one application's job.
///
/// Sleeps until the earliest next occurrence among the installed entries,
/// fires the tick through the channel, then recomputes. Wakes early on
/// entry replacement, pause/resume, and shutdown. Fires use `try_send` so a
/// slow consumer can never stall the timer.
async fn run_job(
    app_id: AppId,
    slug: String,
    entries: Arc<Mutex<Vec<TriggerEntry>>>,
    changed: Arc<Notify>,
    mut running_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
    fired_tx: mpsc::Sender<AppId>,
) {
    loop {
        if *shutdown_rx.borrow() {
            debug!(slug = %slug, "update-check job shutting down");
            return;
        }

        if !*running_rx.borrow() {
            tokio::select! {
                res = running_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    continue;
                }
                res = shutdown_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let now = Utc::now();
        let next = {
            let entries = entries.lock().unwrap();
            entries
                .iter()
                .filter_map(|e| {
                    e.cron.find_next_occurrence(&now, false).ok().or_else(|| {
                        warn!(slug = %slug, entry = e.id, spec = %e.spec, "no next occurrence for trigger entry");
                        None
                    })
                })
                .min()
        };

        let Some(next) = next else {
            tokio::select! {
                _ = changed.notified() => continue,
                res = running_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    continue;
                }
                res = shutdown_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    continue;
                }
            }
        };

        let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                debug!(slug = %slug, "checking updates for app");
                if fired_tx.try_send(app_id.clone()).is_err() {
                    warn!(slug = %slug, "update-check channel full or closed, tick dropped");
                }
            }
            _ = changed.notified() => {}
            res = running_rx.changed() => {
                if res.is_err() {
                    return;
                }
            }
            res = shutdown_rx.changed() => {
                if res.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarterdeck_store::SqliteStore;
    use std::path::PathBuf;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("qd-registry-{}", uuid::Uuid::new_v4()))
    }

    struct TestRig {
        registry: Arc<JobRegistry>,
        store: Arc<SqliteStore>,
        root: PathBuf,
        // Held so the job tasks keep observing a live shutdown channel.
        _shutdown_tx: watch::Sender<bool>,
        _fired_rx: mpsc::Receiver<AppId>,
    }

    fn registry_with_store() -> TestRig {
        let root = scratch();
        let store = Arc::new(SqliteStore::in_memory(&root).unwrap());
        let (fired_tx, _fired_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(JobRegistry::new(store.clone(), fired_tx, shutdown_rx));
        TestRig {
            registry,
            store,
            root,
            _shutdown_tx,
            _fired_rx,
        }
    }

    #[tokio::test]
    async fn configure_twice_installs_exactly_one_entry() {
        let rig = registry_with_store();
        let app = rig
            .store
            .create_app("sentry", "Sentry", "0 */1 * * *", false, "lic")
            .unwrap();

        rig.registry.configure(&app.id).unwrap();
        rig.registry.configure(&app.id).unwrap();

        assert_eq!(rig.registry.trigger_specs(&app.id), vec!["0 */1 * * *"]);
        std::fs::remove_dir_all(&rig.root).unwrap();
    }

    #[tokio::test]
    async fn airgapped_apps_are_never_scheduled() {
        let rig = registry_with_store();
        let app = rig
            .store
            .create_app("sealed", "Sealed", "@default", true, "lic")
            .unwrap();

        rig.registry.configure(&app.id).unwrap();
        assert!(!rig.registry.is_running(&app.id));
        assert!(rig.registry.trigger_specs(&app.id).is_empty());
        std::fs::remove_dir_all(&rig.root).unwrap();
    }

    #[tokio::test]
    async fn never_cadence_stops_an_existing_job() {
        let rig = registry_with_store();
        let app = rig
            .store
            .create_app("sentry", "Sentry", "0 */1 * * *", false, "lic")
            .unwrap();

        rig.registry.configure(&app.id).unwrap();
        assert!(rig.registry.is_running(&app.id));

        rig.store.set_update_check_spec(&app.id, "@never").unwrap();
        rig.registry.configure(&app.id).unwrap();
        assert!(!rig.registry.is_running(&app.id));

        // Reconfiguring with a real cadence reuses and resumes the job.
        rig.store
            .set_update_check_spec(&app.id, "30 5 * * *")
            .unwrap();
        rig.registry.configure(&app.id).unwrap();
        assert!(rig.registry.is_running(&app.id));
        assert_eq!(rig.registry.trigger_specs(&app.id), vec!["30 5 * * *"]);

        std::fs::remove_dir_all(&rig.root).unwrap();
    }

    #[tokio::test]
    async fn malformed_cron_errors_and_leaves_schedule_untouched() {
        let rig = registry_with_store();
        let app = rig
            .store
            .create_app("sentry", "Sentry", "0 */1 * * *", false, "lic")
            .unwrap();
        rig.registry.configure(&app.id).unwrap();

        rig.store
            .set_update_check_spec(&app.id, "every other blue moon")
            .unwrap();
        let err = rig.registry.configure(&app.id).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidSchedule { .. }));

        // Prior trigger survives the failed reconfigure.
        assert_eq!(rig.registry.trigger_specs(&app.id), vec!["0 */1 * * *"]);
        std::fs::remove_dir_all(&rig.root).unwrap();
    }

    #[tokio::test]
    async fn start_skips_never_and_airgapped_apps() {
        let rig = registry_with_store();
        let never = rig
            .store
            .create_app("quiet", "Quiet", "@never", false, "lic")
            .unwrap();
        let airgap = rig
            .store
            .create_app("sealed", "Sealed", "@default", true, "lic")
            .unwrap();
        let hourly = rig
            .store
            .create_app("sentry", "Sentry", "0 */1 * * *", false, "lic")
            .unwrap();

        rig.registry.start().unwrap();

        assert!(rig.registry.trigger_specs(&never.id).is_empty());
        assert!(rig.registry.trigger_specs(&airgap.id).is_empty());
        assert_eq!(rig.registry.trigger_specs(&hourly.id), vec!["0 */1 * * *"]);
        std::fs::remove_dir_all(&rig.root).unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_for_unknown_apps() {
        let rig = registry_with_store();
        rig.registry.stop(&AppId::from("ghost"));
        rig.registry.stop(&AppId::from("ghost"));
        std::fs::remove_dir_all(&rig.root).unwrap();
    }
}
