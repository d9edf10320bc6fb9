//! `quarterdeck-updater` — update-check scheduling and deployment
//! orchestration.
//!
//! # Overview
//!
//! Each installed application owns one recurring trigger in the
//! [`registry::JobRegistry`]; on fire, [`checker::UpdateChecker`] runs
//! release discovery behind the installation-wide single-flight gate (the
//! shared `"update-download"` task status). Discovered releases are handed
//! to a detached [`pipeline::StagingPipeline`] that stages them in
//! ascending cursor order, tolerating per-release failure, and optionally
//! fires the deploy trigger for the final release.
//!
//! # Sequencing
//!
//! Version sequences are assigned by the store as releases stage; each
//! downstream cluster tracks the sequence it last deployed (its "parent
//! sequence"). [`deploy::ensure_deployed`] is the only deploy entry point
//! and skips sequences the primary downstream already considers current.
//!
//! # Concurrency
//!
//! The single-flight gate is deliberately coarse: at most one discovery
//! batch runs at a time across the entire installation, not per
//! application. A stale "running" status left by a crashed process has no
//! TTL; the console clears the token once at startup, before schedules are
//! bootstrapped.

pub mod checker;
pub mod collab;
pub mod deploy;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod schedule;
mod updater;

pub use checker::UpdateChecker;
pub use collab::{
    CollabError, CollabResult, DeployExecutor, FsKindsLoader, KindsLoader, LicenseSync, Reporter,
    UpstreamSource,
};
pub use error::{Result, UpdateError};
pub use pipeline::{PipelineEvent, StagingRoot};
pub use registry::JobRegistry;
pub use updater::Updater;
