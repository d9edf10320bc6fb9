use thiserror::Error;

use crate::collab::CollabError;

/// Errors surfaced by the update orchestrator's synchronous entry points.
///
/// Failures inside the detached staging pipeline never appear here — by the
/// time a release fails to stage, the triggering call has already returned.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Store error: {0}")]
    Store(#[from] quarterdeck_store::StoreError),

    #[error("License sync failed: {0}")]
    LicenseSync(#[source] CollabError),

    #[error("Upstream query failed: {0}")]
    Upstream(#[source] CollabError),

    #[error("Failed to load application kinds: {0}")]
    Kinds(#[source] CollabError),

    #[error("Deploy initiation failed: {0}")]
    Deploy(#[source] CollabError),

    /// The resolved cadence did not parse as a cron expression.
    #[error("Invalid update-check schedule {spec:?}: {reason}")]
    InvalidSchedule { spec: String, reason: String },

    /// The re-assert-current path requires at least one version record.
    #[error("No versions found for app {app_id}")]
    NoVersions { app_id: String },

    #[error("App {app_id} has no downstream targets")]
    NoDownstreams { app_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
