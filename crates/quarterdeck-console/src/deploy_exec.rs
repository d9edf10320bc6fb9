use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quarterdeck_core::types::{AppId, DownstreamOutput};
use quarterdeck_store::Store;
use quarterdeck_updater::{CollabError, CollabResult, DeployExecutor};

/// Store-backed deploy executor: the handoff boundary between this console
/// and whatever applies manifests to the cluster.
///
/// Initiation records the deploy in the downstream output log and advances
/// the primary target's parent sequence so redundant re-deploys are skipped
/// on the next check. Actual manifest application is a separate operator's
/// concern and happens beyond this boundary.
pub struct StoreDeployExecutor {
    store: Arc<dyn Store>,
}

impl StoreDeployExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeployExecutor for StoreDeployExecutor {
    async fn deploy(&self, app_id: &AppId, sequence: i64) -> CollabResult<()> {
        let downstreams = self
            .store
            .list_downstreams(app_id)
            .map_err(|e| CollabError::Internal(e.to_string()))?;
        let primary = downstreams
            .first()
            .ok_or_else(|| CollabError::Internal(format!("no downstreams for app {app_id}")))?;

        let output = DownstreamOutput {
            apply_stdout: format!("deploy of sequence {sequence} initiated"),
            ..Default::default()
        };
        self.store
            .put_downstream_output(app_id, &primary.cluster_id, sequence, &output)
            .map_err(|e| CollabError::Internal(e.to_string()))?;
        self.store
            .set_parent_sequence(app_id, &primary.cluster_id, sequence)
            .map_err(|e| CollabError::Internal(e.to_string()))?;

        info!(app_id = %app_id, sequence, cluster = %primary.cluster_id, "deploy initiated");
        Ok(())
    }
}
