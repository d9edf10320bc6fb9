use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an installed application (UUIDv7 — time-sortable
/// for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for AppId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies a downstream cluster an application deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClusterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An installed application managed by the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    /// Human-readable, URL-safe identifier.
    pub slug: String,
    pub name: String,
    /// Update-check cadence: `"@never"`, `"@default"`, or a cron expression.
    pub update_check_spec: String,
    /// Airgapped applications are excluded from all network polling.
    pub is_airgap: bool,
    /// Highest version sequence staged so far.
    pub current_sequence: i64,
    pub license_id: String,
    /// ISO-8601 timestamp of the last completed update check, if any.
    pub last_update_check_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Where a staged version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// Discovered and downloaded from the upstream release stream.
    Release,
    /// Uploaded through the console by an operator.
    ManualUpload,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionSource::Release => "release",
            VersionSource::ManualUpload => "manual upload",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for VersionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "release" => Ok(VersionSource::Release),
            "manual upload" => Ok(VersionSource::ManualUpload),
            other => Err(format!("unknown version source: {other}")),
        }
    }
}

/// An immutable release descriptor from the upstream source.
///
/// The `cursor` is opaque but totally ordered — see [`compare_cursors`].
/// Releases in one discovery batch are always processed in ascending
/// cursor order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub cursor: String,
    pub version_label: String,
    #[serde(default)]
    pub released_at: Option<String>,
}

/// A staged version record. Sequence numbers are assigned by the store in
/// creation order and are never reused or skipped within an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppVersion {
    pub app_id: AppId,
    pub sequence: i64,
    pub source: VersionSource,
    pub version_label: String,
    /// Durable location of the staged archive directory.
    pub archive_path: String,
    pub created_at: String,
}

/// A downstream cluster target for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downstream {
    pub app_id: AppId,
    pub cluster_id: ClusterId,
    pub name: String,
    /// The sequence this target currently considers deployed, if any.
    pub current_parent_sequence: Option<i64>,
}

/// The latest license payload held for an application. License sync against
/// the upstream source may rotate the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub app_id: AppId,
    /// Opaque signed license document. Validation is not this system's job.
    pub payload: String,
    pub updated_at: String,
}

/// Result of syncing an application's license against the upstream source.
#[derive(Debug, Clone)]
pub struct LicenseSyncOutcome {
    pub license: License,
    /// True when the sync itself produced a new release (e.g. an entitlement
    /// change) — callers must reload the application afterwards.
    pub created_new_release: bool,
}

/// Structured identity parsed from a staged archive's `installation.json`.
///
/// Supplies the cursor/channel needed to ask the upstream source
/// "what's newer than this".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppKinds {
    pub cursor: String,
    pub channel_id: String,
    pub channel_name: String,
    pub version_label: String,
}

/// Telemetry attribution attached to upstream release queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingInfo {
    pub app_id: String,
    pub instance_id: String,
    pub console_version: String,
}

/// The shared update-check task token. There is exactly one per
/// installation (task name `"update-download"`), not one per application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    pub message: String,
    pub updated_at: String,
}

/// Captured output of a deploy initiation for one (app, cluster, sequence).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamOutput {
    pub dryrun_stdout: String,
    pub dryrun_stderr: String,
    pub apply_stdout: String,
    pub apply_stderr: String,
    pub render_error: String,
}

/// Total order over release cursors.
///
/// Upstream cursors are usually decimal channel sequence numbers; compare
/// numerically when both sides parse, otherwise fall back to lexicographic
/// comparison so the order is still total for exotic cursors.
pub fn compare_cursors(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_compare_numeric() {
        assert_eq!(compare_cursors("2", "10"), Ordering::Less);
        assert_eq!(compare_cursors("10", "2"), Ordering::Greater);
        assert_eq!(compare_cursors("7", "7"), Ordering::Equal);
    }

    #[test]
    fn cursor_compare_lexicographic_fallback() {
        // Non-numeric cursors fall back to string order.
        assert_eq!(compare_cursors("abc", "abd"), Ordering::Less);
        assert_eq!(compare_cursors("v2", "v10"), Ordering::Greater);
    }

    #[test]
    fn version_source_round_trip() {
        use std::str::FromStr;
        assert_eq!(
            VersionSource::from_str("release").unwrap(),
            VersionSource::Release
        );
        assert_eq!(
            VersionSource::from_str("manual upload").unwrap(),
            VersionSource::ManualUpload
        );
        assert!(VersionSource::from_str("airgap").is_err());
        assert_eq!(VersionSource::Release.to_string(), "release");
    }
}
