use quarterdeck_core::types::AppId;
use quarterdeck_store::Store;
use tracing::{debug, info};

use crate::collab::DeployExecutor;
use crate::error::{Result, UpdateError};

/// Initiate deployment of `sequence` unless the primary downstream target
/// already considers it deployed.
///
/// The primary target is the first entry in the store's stable downstream
/// order. Redundant deploys of an already-current sequence are skipped —
/// this is the idempotence guard that makes re-assert-current and
/// end-of-pipeline deploys safe to fire repeatedly.
pub async fn ensure_deployed(
    store: &dyn Store,
    deployer: &dyn DeployExecutor,
    app_id: &AppId,
    sequence: i64,
) -> Result<()> {
    let downstreams = store.list_downstreams(app_id)?;
    let primary = downstreams.first().ok_or_else(|| UpdateError::NoDownstreams {
        app_id: app_id.to_string(),
    })?;

    let parent = store.current_parent_sequence(app_id, &primary.cluster_id)?;
    if parent == Some(sequence) {
        debug!(app_id = %app_id, sequence, "sequence already deployed to primary downstream, skipping");
        return Ok(());
    }

    info!(app_id = %app_id, sequence, cluster = %primary.cluster_id, "initiating deploy");
    deployer
        .deploy(app_id, sequence)
        .await
        .map_err(UpdateError::Deploy)
}
