use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use quarterdeck_core::config::UpstreamConfig;
use quarterdeck_core::types::{
    compare_cursors, App, AppId, AppKinds, License, LicenseSyncOutcome, Release, ReportingInfo,
};
use quarterdeck_updater::{
    CollabError, CollabResult, LicenseSync, Reporter, UpstreamSource,
};

/// SHA-256 of the archive body, when the upstream advertises one.
const ARCHIVE_DIGEST_HEADER: &str = "x-archive-sha256";

/// HTTP client for the upstream release source.
///
/// Two underlying clients: a short-timeout one for JSON calls (release
/// listing, license sync, reporting) and a long-timeout one for archive
/// downloads, which can be large.
pub struct UpstreamClient {
    http: reqwest::Client,
    download: reqwest::Client,
    endpoint: String,
    instance_id: String,
}

#[derive(Deserialize)]
struct ReleasesResponse {
    releases: Vec<Release>,
}

#[derive(Deserialize)]
struct LicenseSyncResponse {
    payload: String,
    #[serde(default)]
    created_new_release: bool,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, instance_id: String) -> CollabResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollabError::Request(e.to_string()))?;
        let download = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| CollabError::Request(e.to_string()))?;

        Ok(Self {
            http,
            download,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            instance_id,
        })
    }

    async fn read_error_body(response: reqwest::Response) -> CollabError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CollabError::Status { status, body }
    }
}

#[async_trait]
impl UpstreamSource for UpstreamClient {
    async fn releases_after(
        &self,
        license: &License,
        kinds: &AppKinds,
        reporting: &ReportingInfo,
    ) -> CollabResult<Vec<Release>> {
        let url = format!("{}/v1/releases", self.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("license_id", license.id.as_str()),
                ("channel_id", kinds.channel_id.as_str()),
                ("after", kinds.cursor.as_str()),
                ("current_version", kinds.version_label.as_str()),
            ])
            .header("x-quarterdeck-instance-id", &reporting.instance_id)
            .header("x-quarterdeck-console-version", &reporting.console_version)
            .send()
            .await
            .map_err(|e| CollabError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }

        let parsed: ReleasesResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Malformed(e.to_string()))?;

        // The server promises ascending cursor order; enforce it anyway —
        // the staging pipeline's "deploy only the last" depends on it.
        let mut releases = parsed.releases;
        releases.sort_by(|a, b| compare_cursors(&a.cursor, &b.cursor));

        debug!(
            channel = %kinds.channel_name,
            after = %kinds.cursor,
            count = releases.len(),
            "release query complete"
        );
        Ok(releases)
    }

    async fn download_release(
        &self,
        app: &App,
        dest: &Path,
        cursor: &str,
        skip_preflights: bool,
    ) -> CollabResult<()> {
        let url = format!(
            "{}/v1/app/{}/release/{}/archive",
            self.endpoint, app.slug, cursor
        );
        let response = self
            .download
            .get(&url)
            .query(&[("skip_preflights", skip_preflights.to_string())])
            .send()
            .await
            .map_err(|e| CollabError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }

        let expected_digest = response
            .headers()
            .get(ARCHIVE_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CollabError::Request(e.to_string()))?;

        if let Some(expected) = expected_digest {
            verify_digest(&bytes, &expected)?;
        }

        // Write the tarball next to the staging tree, extract over it, and
        // clean the tarball up — the extracted tree replaces matching paths
        // in the previously staged version.
        let tarball = dest.join(format!("release-{cursor}.tar.gz"));
        std::fs::write(&tarball, &bytes)?;
        let extract_result = run_cmd(dest, "tar", &["xzf", &tarball.to_string_lossy()]);
        let _ = std::fs::remove_file(&tarball);
        extract_result?;

        if !dest.join("installation.json").is_file() {
            return Err(CollabError::Archive(format!(
                "release {cursor} archive is missing installation.json"
            )));
        }

        debug!(slug = %app.slug, cursor, "release archive staged");
        Ok(())
    }
}

#[async_trait]
impl LicenseSync for UpstreamClient {
    async fn sync(&self, app: &App, current: &License) -> CollabResult<LicenseSyncOutcome> {
        let url = format!("{}/v1/license/{}/sync", self.endpoint, current.id);
        let response = self
            .http
            .put(&url)
            .json(&serde_json::json!({
                "app_slug": app.slug,
                "payload": current.payload,
            }))
            .send()
            .await
            .map_err(|e| CollabError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }

        let parsed: LicenseSyncResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Malformed(e.to_string()))?;

        let rotated = parsed.payload != current.payload;
        if rotated {
            debug!(slug = %app.slug, "license payload rotated by upstream");
        }

        Ok(LicenseSyncOutcome {
            license: License {
                id: current.id.clone(),
                app_id: current.app_id.clone(),
                payload: parsed.payload,
                updated_at: Utc::now().to_rfc3339(),
            },
            created_new_release: parsed.created_new_release,
        })
    }
}

#[async_trait]
impl Reporter for UpstreamClient {
    fn reporting_info(&self, app_id: &AppId) -> ReportingInfo {
        ReportingInfo {
            app_id: app_id.to_string(),
            instance_id: self.instance_id.clone(),
            console_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn report_app_info(
        &self,
        app_id: &AppId,
        sequence: i64,
        skip_preflights: bool,
        is_cli: bool,
    ) -> CollabResult<()> {
        let url = format!("{}/v1/instance/report", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "app_id": app_id.as_str(),
                "sequence": sequence,
                "skip_preflights": skip_preflights,
                "is_cli": is_cli,
                "instance_id": self.instance_id,
                "console_version": env!("CARGO_PKG_VERSION"),
            }))
            .send()
            .await
            .map_err(|e| CollabError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::read_error_body(response).await);
        }
        Ok(())
    }
}

/// Compare the SHA-256 of `data` against a hex digest.
fn verify_digest(data: &[u8], expected: &str) -> CollabResult<()> {
    let actual = sha256_hex(data);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(CollabError::Archive(format!(
            "SHA256 mismatch: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// Compute SHA256 hex digest of a byte slice.
fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Run a shell command synchronously, capturing stderr on failure.
fn run_cmd(cwd: &Path, program: &str, args: &[&str]) -> CollabResult<()> {
    let output = std::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| CollabError::Archive(format!("failed to execute {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CollabError::Archive(format!(
            "{program} {args:?} failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        // sha256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_verification_is_case_insensitive() {
        assert!(verify_digest(
            b"abc",
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        )
        .is_ok());
        assert!(matches!(
            verify_digest(b"abc", "deadbeef"),
            Err(CollabError::Archive(_))
        ));
    }

    #[test]
    fn releases_parse_and_sort_ascending() {
        let raw = r#"{"releases":[
            {"cursor":"10","version_label":"1.2.0"},
            {"cursor":"2","version_label":"1.1.0","released_at":"2023-04-07T00:00:00Z"}
        ]}"#;
        let mut parsed: ReleasesResponse = serde_json::from_str(raw).unwrap();
        parsed
            .releases
            .sort_by(|a, b| compare_cursors(&a.cursor, &b.cursor));

        let cursors: Vec<_> = parsed.releases.iter().map(|r| r.cursor.as_str()).collect();
        assert_eq!(cursors, vec!["2", "10"]);
    }
}
