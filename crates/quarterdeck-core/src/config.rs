use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18800;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Task-status token shared by every update check in the installation.
pub const UPDATE_DOWNLOAD_TASK: &str = "update-download";

/// Top-level config (quarterdeck.toml + QUARTERDECK_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarterdeckConfig {
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub updates: UpdatesConfig,
}

impl Default for QuarterdeckConfig {
    fn default() -> Self {
        Self {
            console: ConsoleConfig::default(),
            database: DatabaseConfig::default(),
            upstream: UpstreamConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Durable root for staged version archives.
    #[serde(default = "default_archives_dir")]
    pub archives_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            archives_dir: default_archives_dir(),
        }
    }
}

/// Upstream release source endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout for release listing and license sync.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for archive downloads, which can be large.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_upstream_endpoint(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// Update-checker subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesConfig {
    /// Bootstrap schedules for all installed apps on server start
    /// (default: true).
    #[serde(default = "bool_true")]
    pub check_on_start: bool,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            check_on_start: true,
        }
    }
}

impl QuarterdeckConfig {
    /// Load config from a TOML file with QUARTERDECK_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.quarterdeck/quarterdeck.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: QuarterdeckConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("QUARTERDECK_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConsoleError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_upstream_endpoint() -> String {
    "https://releases.quarterdeck.dev".to_string()
}
fn default_user_agent() -> String {
    format!("quarterdeck-console/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_download_timeout_secs() -> u64 {
    300
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.quarterdeck/quarterdeck.db", home)
}
fn default_archives_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.quarterdeck/archives", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.quarterdeck/quarterdeck.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = QuarterdeckConfig::default();
        assert_eq!(config.console.port, DEFAULT_PORT);
        assert!(config.updates.check_on_start);
        assert!(config.database.path.ends_with("quarterdeck.db"));
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("qd-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quarterdeck.toml");
        std::fs::write(
            &path,
            "[console]\nport = 9999\n\n[updates]\ncheck_on_start = false\n",
        )
        .unwrap();

        let config = QuarterdeckConfig::load(path.to_str()).unwrap();
        assert_eq!(config.console.port, 9999);
        assert!(!config.updates.check_on_start);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
