// End-to-end behavior of release discovery, the single-flight gate, the
// detached staging pipeline, and the deploy trigger — driven through stub
// collaborators over a real in-memory store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use quarterdeck_core::config::UPDATE_DOWNLOAD_TASK;
use quarterdeck_core::types::{
    App, AppId, AppKinds, ClusterId, License, LicenseSyncOutcome, Release, ReportingInfo,
    VersionSource,
};
use quarterdeck_store::{SqliteStore, Store};
use quarterdeck_updater::{
    CollabError, CollabResult, DeployExecutor, FsKindsLoader, LicenseSync, PipelineEvent, Reporter,
    UpdateChecker, UpdateError, UpstreamSource,
};

// ─── Stub collaborators ─────────────────────────────────────────────────────

#[derive(Default)]
struct StubLicense {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl LicenseSync for StubLicense {
    async fn sync(&self, _app: &App, current: &License) -> CollabResult<LicenseSyncOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollabError::Request("license service unreachable".into()));
        }
        Ok(LicenseSyncOutcome {
            license: License {
                updated_at: Utc::now().to_rfc3339(),
                ..current.clone()
            },
            created_new_release: false,
        })
    }
}

struct StubUpstream {
    releases: Vec<Release>,
    fail_cursors: HashSet<String>,
    list_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl StubUpstream {
    fn new(releases: Vec<Release>, fail_cursors: &[&str]) -> Self {
        Self {
            releases,
            fail_cursors: fail_cursors.iter().map(|c| c.to_string()).collect(),
            list_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    fn empty() -> Self {
        Self::new(Vec::new(), &[])
    }
}

#[async_trait]
impl UpstreamSource for StubUpstream {
    async fn releases_after(
        &self,
        _license: &License,
        _kinds: &AppKinds,
        _reporting: &ReportingInfo,
    ) -> CollabResult<Vec<Release>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.releases.clone())
    }

    async fn download_release(
        &self,
        _app: &App,
        dest: &Path,
        cursor: &str,
        _skip_preflights: bool,
    ) -> CollabResult<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cursors.contains(cursor) {
            return Err(CollabError::Request(format!(
                "download failed for cursor {cursor}"
            )));
        }
        std::fs::write(dest.join("content.txt"), cursor)?;
        Ok(())
    }
}

#[derive(Default)]
struct StubDeployer {
    deploys: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl DeployExecutor for StubDeployer {
    async fn deploy(&self, app_id: &AppId, sequence: i64) -> CollabResult<()> {
        self.deploys
            .lock()
            .unwrap()
            .push((app_id.to_string(), sequence));
        Ok(())
    }
}

#[derive(Default)]
struct StubReporter {
    reports: AtomicUsize,
}

#[async_trait]
impl Reporter for StubReporter {
    fn reporting_info(&self, app_id: &AppId) -> ReportingInfo {
        ReportingInfo {
            app_id: app_id.to_string(),
            instance_id: "test-instance".to_string(),
            console_version: "0.0.0-test".to_string(),
        }
    }

    async fn report_app_info(
        &self,
        _app_id: &AppId,
        _sequence: i64,
        _skip_preflights: bool,
        _is_cli: bool,
    ) -> CollabResult<()> {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<SqliteStore>,
    license: Arc<StubLicense>,
    upstream: Arc<StubUpstream>,
    deployer: Arc<StubDeployer>,
    reporter: Arc<StubReporter>,
    checker: UpdateChecker,
    events: mpsc::Receiver<PipelineEvent>,
    app: App,
    cluster: ClusterId,
    scratch: Vec<PathBuf>,
}

impl Harness {
    fn new(upstream: StubUpstream) -> Self {
        Self::with_license(upstream, StubLicense::default())
    }

    fn with_license(upstream: StubUpstream, license: StubLicense) -> Self {
        let archives = temp_dir("archives");
        let store = Arc::new(SqliteStore::in_memory(&archives).unwrap());

        let app = store
            .create_app("sentry", "Sentry", "@default", false, "license-blob")
            .unwrap();
        let cluster = ClusterId::from("local");
        store.create_downstream(&app.id, &cluster, "This Cluster").unwrap();

        // Seed the current version (sequence 0) with its installation kinds.
        let staging = temp_dir("seed");
        std::fs::write(
            staging.join("installation.json"),
            r#"{"cursor":"1","channel_id":"stable-id","channel_name":"Stable","version_label":"1.0.0"}"#,
        )
        .unwrap();
        store
            .create_version(&app.id, VersionSource::Release, "1.0.0", &staging)
            .unwrap();

        let license = Arc::new(license);
        let upstream = Arc::new(upstream);
        let deployer = Arc::new(StubDeployer::default());
        let reporter = Arc::new(StubReporter::default());
        let (events_tx, events) = mpsc::channel(32);

        let checker = UpdateChecker::new(
            store.clone(),
            license.clone(),
            upstream.clone(),
            Arc::new(FsKindsLoader),
            deployer.clone(),
            reporter.clone(),
        )
        .with_events(events_tx);

        let app = store.get_app(&app.id).unwrap();
        Self {
            store,
            license,
            upstream,
            deployer,
            reporter,
            checker,
            events,
            app,
            cluster,
            scratch: vec![archives, staging],
        }
    }

    async fn check(&self, deploy: bool) -> Result<i64, UpdateError> {
        self.checker
            .check_for_updates(&self.app.id, deploy, false, false)
            .await
    }

    /// Drain pipeline events until the batch completes.
    async fn await_batch(&mut self) -> Vec<PipelineEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for pipeline")
                .expect("pipeline event channel closed");
            if event == PipelineEvent::BatchComplete {
                return seen;
            }
            seen.push(event);
        }
    }

    fn deploys(&self) -> Vec<(String, i64)> {
        self.deployer.deploys.lock().unwrap().clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for dir in &self.scratch {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qd-flow-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn release(cursor: &str, label: &str) -> Release {
    Release {
        cursor: cursor.to_string(),
        version_label: label.to_string(),
        released_at: None,
    }
}

// ─── Gate ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn running_gate_short_circuits_without_touching_collaborators() {
    let h = Harness::new(StubUpstream::empty());
    h.store
        .set_task_status(UPDATE_DOWNLOAD_TASK, "1 Updates available...", "running")
        .unwrap();

    let available = h.check(false).await.unwrap();

    assert_eq!(available, 0);
    assert_eq!(h.license.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.upstream.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_non_running_status_is_cleared_before_checking() {
    let h = Harness::new(StubUpstream::empty());
    h.store
        .set_task_status(UPDATE_DOWNLOAD_TASK, "something broke", "failed")
        .unwrap();

    let available = h.check(false).await.unwrap();

    assert_eq!(available, 0);
    assert_eq!(h.license.calls.load(Ordering::SeqCst), 1);
    assert!(h.store.get_task_status(UPDATE_DOWNLOAD_TASK).unwrap().is_none());
}

#[tokio::test]
async fn license_sync_failure_aborts_without_sticking_the_gate() {
    let h = Harness::with_license(
        StubUpstream::empty(),
        StubLicense {
            fail: true,
            ..Default::default()
        },
    );

    let err = h.check(false).await.unwrap_err();
    assert!(matches!(err, UpdateError::LicenseSync(_)));

    // The gate is only set after releases are confirmed found, so a
    // synchronous failure leaves nothing "running".
    assert!(h.store.get_task_status(UPDATE_DOWNLOAD_TASK).unwrap().is_none());
    assert_eq!(h.upstream.list_calls.load(Ordering::SeqCst), 0);
}

// ─── Discovery ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_updates_records_last_checked_timestamp() {
    let h = Harness::new(StubUpstream::empty());
    assert!(h.app.last_update_check_at.is_none());

    h.check(false).await.unwrap();

    let app = h.store.get_app(&h.app.id).unwrap();
    assert!(app.last_update_check_at.is_some());
}

#[tokio::test]
async fn discovery_returns_count_and_stages_detached() {
    let mut h = Harness::new(StubUpstream::new(
        vec![release("2", "1.1.0"), release("3", "1.2.0")],
        &[],
    ));

    let available = h.check(false).await.unwrap();
    assert_eq!(available, 2);

    // The gate is already closed when the synchronous call returns.
    let status = h.store.get_task_status(UPDATE_DOWNLOAD_TASK).unwrap().unwrap();
    assert_eq!(status.status, "running");
    assert_eq!(status.message, "2 Updates available...");

    let events = h.await_batch().await;
    assert_eq!(
        events,
        vec![
            PipelineEvent::Staged {
                cursor: "2".to_string(),
                sequence: 1
            },
            PipelineEvent::Staged {
                cursor: "3".to_string(),
                sequence: 2
            },
        ]
    );

    // Batch completion reopens the gate.
    assert!(h.store.get_task_status(UPDATE_DOWNLOAD_TASK).unwrap().is_none());

    // deploy=false: nothing deployed even though everything staged.
    assert!(h.deploys().is_empty());
}

// ─── Staging pipeline ───────────────────────────────────────────────────────

#[tokio::test]
async fn failed_release_is_skipped_and_deploy_targets_only_the_last() {
    let mut h = Harness::new(StubUpstream::new(
        vec![
            release("2", "1.1.0"),
            release("3", "1.2.0"),
            release("4", "1.3.0"),
        ],
        &["2"],
    ));

    let available = h.check(true).await.unwrap();
    assert_eq!(available, 3);

    let events = h.await_batch().await;
    assert_eq!(
        events,
        vec![
            PipelineEvent::Failed {
                cursor: "2".to_string()
            },
            PipelineEvent::Staged {
                cursor: "3".to_string(),
                sequence: 1
            },
            PipelineEvent::Staged {
                cursor: "4".to_string(),
                sequence: 2
            },
        ]
    );

    // Later releases staged despite the earlier failure, with ascending,
    // gapless sequences.
    let versions = h.store.list_versions(&h.app.id).unwrap();
    assert_eq!(
        versions.iter().map(|v| v.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(versions[2].version_label, "1.3.0");

    // Deploy attempted exactly once, for the final release's sequence.
    assert_eq!(h.deploys(), vec![(h.app.id.to_string(), 2)]);

    // All three downloads were attempted, in order.
    assert_eq!(h.upstream.download_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn telemetry_reports_after_final_deploy() {
    let mut h = Harness::new(StubUpstream::new(vec![release("2", "1.1.0")], &[]));

    h.check(true).await.unwrap();
    h.await_batch().await;

    // The report task is spawned detached; give it a moment.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.reporter.reports.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("usage report was never sent");

    assert_eq!(h.reporter.reports.load(Ordering::SeqCst), 1);
}

// ─── Re-assert current (zero updates, deploy=true) ──────────────────────────

#[tokio::test]
async fn reassert_skips_when_parent_sequence_is_current() {
    let h = Harness::new(StubUpstream::empty());
    h.store
        .set_parent_sequence(&h.app.id, &h.cluster, 0)
        .unwrap();

    let available = h.check(true).await.unwrap();

    assert_eq!(available, 0);
    assert!(h.deploys().is_empty());
}

#[tokio::test]
async fn reassert_deploys_highest_sequence_when_parent_is_behind() {
    let h = Harness::new(StubUpstream::empty());

    // Stage a second version directly; the downstream still points at 0.
    let staging = temp_dir("extra");
    std::fs::write(staging.join("content.txt"), "v2").unwrap();
    h.store
        .create_version(&h.app.id, VersionSource::ManualUpload, "1.1.0", &staging)
        .unwrap();
    std::fs::remove_dir_all(&staging).unwrap();
    h.store
        .set_parent_sequence(&h.app.id, &h.cluster, 0)
        .unwrap();

    let available = h.check(true).await.unwrap();

    assert_eq!(available, 0);
    assert_eq!(h.deploys(), vec![(h.app.id.to_string(), 1)]);
}

#[tokio::test]
async fn reassert_deploys_when_target_never_deployed() {
    let h = Harness::new(StubUpstream::empty());

    // current_parent_sequence is NULL — the target never deployed anything.
    let available = h.check(true).await.unwrap();

    assert_eq!(available, 0);
    assert_eq!(h.deploys(), vec![(h.app.id.to_string(), 0)]);
}
