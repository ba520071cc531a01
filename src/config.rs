use crate::core::locator::{Version, DEFAULT_SEARCH_PATHS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Directories probed for memcached after the default search path
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
    /// Try plain `memcached` through PATH before `search_paths`
    #[serde(default = "default_true")]
    pub search_system_path: bool,
    #[serde(default = "default_min_version")]
    pub min_version: String,
    /// Wait after spawning a server before using it
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait after starting a background mock before the test body runs
    #[serde(default = "default_mock_settle_ms")]
    pub mock_settle_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub sasl: SaslConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SaslConfig {
    /// Exported to the server as MEMCACHED_SASL_PWDB
    #[serde(default = "default_sasl_pwdb")]
    pub pwdb_path: PathBuf,
    /// Exported to the server as SASL_CONF_PATH
    #[serde(default = "default_sasl_conf")]
    pub conf_path: PathBuf,
    #[serde(default = "default_sasl_username")]
    pub username: String,
    #[serde(default = "default_sasl_password")]
    pub password: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            search_system_path: true,
            min_version: default_min_version(),
            settle_ms: default_settle_ms(),
            max_attempts: default_max_attempts(),
            mock_settle_ms: default_mock_settle_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            sasl: SaslConfig::default(),
        }
    }
}

impl Default for SaslConfig {
    fn default() -> Self {
        Self {
            pwdb_path: default_sasl_pwdb(),
            conf_path: default_sasl_conf(),
            username: default_sasl_username(),
            password: default_sasl_password(),
        }
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect()
}
fn default_true() -> bool {
    true
}
fn default_min_version() -> String {
    "1.4.0".to_string()
}
fn default_settle_ms() -> u64 {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_mock_settle_ms() -> u64 {
    300
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
/// Directory holding the bundled SASL fixtures, independent of the working directory
pub fn sasl_fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sasl")
}
fn default_sasl_pwdb() -> PathBuf {
    sasl_fixture_dir().join("sasldb")
}
fn default_sasl_conf() -> PathBuf {
    sasl_fixture_dir().join("memcached.conf")
}
fn default_sasl_username() -> String {
    "testuser".to_string()
}
fn default_sasl_password() -> String {
    "testtest".to_string()
}

impl HarnessConfig {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        self.min_version()?;

        if !self.search_system_path && self.search_paths.is_empty() {
            return Err(ConfigError::ValidationError(
                "No search path configured for memcached".to_string(),
            ));
        }

        if self.sasl.username.is_empty() {
            return Err(ConfigError::ValidationError(
                "sasl.username must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn min_version(&self) -> Result<Version, ConfigError> {
        self.min_version
            .parse()
            .map_err(|e: String| ConfigError::ValidationError(format!("min_version: {}", e)))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn mock_settle(&self) -> Duration {
        Duration::from_millis(self.mock_settle_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
