//! Config - YAML 設定の読み込みと、未設定値の補完
//!
//! # 読み込み順
//! 1. `CONFIG_NAME`（`.yaml` 必須）を設定ディレクトリから探す
//! 2. YAML をパース（空ファイルはエラー）
//! 3. `scraper` セクションの未設定フィールドを SecretSource から補完（キーは `SECTION_FIELD`）

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use herald_core::ConnectionPolicy;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CONFIG_NAME environment variable not set")]
    MissingConfigName,

    #[error("CONFIG_NAME must end with .yaml (got {0:?})")]
    NotYaml(String),

    #[error("configuration file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("configuration file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("secret {key} has an invalid value")]
    InvalidSecret { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScraperConfig {
    pub session_name: String,
    #[serde(default)]
    pub api_id: Option<i64>,
    #[serde(default)]
    pub api_hash: Option<String>,
    /// JSON fixture served by the in-memory platform session.
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "QueueConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "QueueConfig::default_backoff_secs")]
    pub backoff_secs: u64,
}

impl QueueConfig {
    fn default_connect_timeout_secs() -> u64 {
        ConnectionPolicy::DEFAULT_CONNECT_TIMEOUT.as_secs()
    }

    fn default_backoff_secs() -> u64 {
        ConnectionPolicy::DEFAULT_BACKOFF.as_secs()
    }

    pub fn policy(&self) -> ConnectionPolicy {
        ConnectionPolicy::new(
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.backoff_secs),
        )
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            backoff_secs: Self::default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Where secrets missing from the YAML file come from.
pub trait SecretSource {
    fn secret(&self, key: &str) -> Option<String>;
}

/// Process environment (after `.env` has been loaded).
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Resolve `CONFIG_NAME` inside `config_dir`.
pub fn config_path(config_dir: &Path, config_name: Option<&str>) -> Result<PathBuf, ConfigError> {
    let name = config_name
        .filter(|name| !name.is_empty())
        .ok_or(ConfigError::MissingConfigName)?;
    if !name.ends_with(".yaml") {
        return Err(ConfigError::NotYaml(name.to_string()));
    }
    Ok(config_dir.join(name))
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "loading configuration");
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw, path)
    }

    pub fn from_yaml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if value.is_null() {
            return Err(ConfigError::Empty(origin.to_path_buf()));
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Fill `scraper` fields the YAML left unset. Missing secrets only warn.
    pub fn fill_secrets(&mut self, secrets: &dyn SecretSource) -> Result<(), ConfigError> {
        let scraper = &mut self.scraper;

        if scraper.api_id.is_none() {
            match secrets.secret("SCRAPER_API_ID") {
                Some(value) => {
                    let id = value.trim().parse().map_err(|_| ConfigError::InvalidSecret {
                        key: "SCRAPER_API_ID".to_string(),
                    })?;
                    scraper.api_id = Some(id);
                    info!("loaded scraper.api_id from secrets");
                }
                None => warn!("could not load scraper.api_id from secrets"),
            }
        }

        if scraper.api_hash.is_none() {
            match secrets.secret("SCRAPER_API_HASH") {
                Some(value) => {
                    scraper.api_hash = Some(value);
                    info!("loaded scraper.api_hash from secrets");
                }
                None => warn!("could not load scraper.api_hash from secrets"),
            }
        }

        if scraper.fixture_path.is_none()
            && let Some(value) = secrets.secret("SCRAPER_FIXTURE_PATH")
        {
            scraper.fixture_path = Some(PathBuf::from(value));
            info!("loaded scraper.fixture_path from secrets");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL: &str = r#"
scraper:
  session_name: herald
  api_id: 12345
  api_hash: abc
gcp:
  project_id: demo
server:
  port: 9000
queue:
  backoff_secs: 2
"#;

    fn origin() -> &'static Path {
        Path::new("config/test.yaml")
    }

    #[test]
    fn parses_all_sections_with_defaults() {
        let config = AppConfig::from_yaml_str(FULL, origin()).unwrap();
        assert_eq!(config.scraper.api_id, Some(12345));
        assert_eq!(config.gcp.project_id.as_deref(), Some("demo"));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.queue.policy(),
            ConnectionPolicy::new(Duration::from_secs(10), Duration::from_secs(2))
        );
    }

    #[rstest]
    #[case("")]
    #[case("# nothing here\n")]
    fn empty_documents_are_rejected(#[case] raw: &str) {
        assert!(matches!(
            AppConfig::from_yaml_str(raw, origin()),
            Err(ConfigError::Empty(_))
        ));
    }

    #[test]
    fn missing_scraper_section_is_a_parse_error() {
        assert!(matches!(
            AppConfig::from_yaml_str("gcp:\n  project_id: x\n", origin()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[rstest]
    #[case(None, "CONFIG_NAME environment variable not set")]
    #[case(Some(""), "CONFIG_NAME environment variable not set")]
    #[case(Some("prod.yml"), "CONFIG_NAME must end with .yaml (got \"prod.yml\")")]
    fn config_name_is_validated(#[case] name: Option<&str>, #[case] message: &str) {
        let err = config_path(Path::new("config"), name).unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn config_path_joins_the_directory() {
        let path = config_path(Path::new("/etc/herald"), Some("prod.yaml")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/herald/prod.yaml"));
    }

    #[test]
    fn load_reports_a_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/herald.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn secrets_fill_only_unset_fields() {
        let mut config =
            AppConfig::from_yaml_str("scraper:\n  session_name: s\n  api_hash: from-yaml\n", origin())
                .unwrap();
        let secrets: HashMap<String, String> = [
            ("SCRAPER_API_ID", "777"),
            ("SCRAPER_API_HASH", "from-secrets"),
            ("SCRAPER_FIXTURE_PATH", "fixtures/demo.json"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.fill_secrets(&secrets).unwrap();
        assert_eq!(config.scraper.api_id, Some(777));
        assert_eq!(config.scraper.api_hash.as_deref(), Some("from-yaml"));
        assert_eq!(
            config.scraper.fixture_path,
            Some(PathBuf::from("fixtures/demo.json"))
        );
    }

    #[test]
    fn missing_secrets_are_not_an_error() {
        let mut config = AppConfig::from_yaml_str("scraper:\n  session_name: s\n", origin()).unwrap();
        config.fill_secrets(&HashMap::<String, String>::new()).unwrap();
        assert_eq!(config.scraper.api_id, None);
        assert_eq!(config.scraper.api_hash, None);
    }

    #[test]
    fn malformed_api_id_secret_is_an_error() {
        let mut config = AppConfig::from_yaml_str("scraper:\n  session_name: s\n", origin()).unwrap();
        let secrets = HashMap::from([("SCRAPER_API_ID".to_string(), "not-a-number".to_string())]);
        assert!(matches!(
            config.fill_secrets(&secrets),
            Err(ConfigError::InvalidSecret { .. })
        ));
    }
}
