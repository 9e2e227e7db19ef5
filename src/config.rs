//! Configuration loading.
//!
//! Reads the `bedweb.yaml` server configuration. A missing file is a fatal
//! startup error; a malformed file surfaces the YAML parser's location so
//! the operator can fix the offending line.
//!
//! Note: the telemetry period key is spelled `qeury_period`. The misspelling
//! is part of the config contract and existing deployments rely on it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bedweb.yaml";

/// Configuration for the bedweb server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Transport bind address (`host:port`).
    pub listen: String,

    /// TLS key material. The listener serves `wss://` when present.
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// Telemetry period in seconds. Zero is treated as one.
    #[serde(default = "default_query_period", rename = "qeury_period")]
    pub query_period: u64,

    /// Default path for disk-space samples.
    #[serde(default = "default_monitor_path")]
    pub monitor_path: PathBuf,
}

/// TLS certificate/private-key paths (PEM).
#[derive(Debug, Clone, Deserialize)]
pub struct SslConfig {
    /// Certificate chain file.
    pub cert: PathBuf,
    /// Private key file.
    #[serde(rename = "priv")]
    pub private_key: PathBuf,
}

fn default_query_period() -> u64 {
    1
}

fn default_monitor_path() -> PathBuf {
    PathBuf::from("/")
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or fails to parse; parse
    /// errors carry the YAML location (line/column) from `serde_yaml`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to load config {}: file not found", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to load config {}", path.display()))?;
        Ok(config)
    }

    /// Effective telemetry period. A configured zero falls back to one
    /// second, matching the historical behavior.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.query_period.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config: Config = serde_yaml::from_str("listen: \"127.0.0.1:18000\"\n").unwrap();
        assert_eq!(config.listen, "127.0.0.1:18000");
        assert!(config.ssl.is_none());
        assert_eq!(config.query_period, 1);
        assert_eq!(config.monitor_path, PathBuf::from("/"));
    }

    #[test]
    fn parses_full_config() {
        let yaml = r#"
listen: "0.0.0.0:443"
ssl:
  cert: /etc/bedweb/cert.pem
  priv: /etc/bedweb/key.pem
qeury_period: 5
monitor_path: /var
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let ssl = config.ssl.expect("ssl section should parse");
        assert_eq!(ssl.cert, PathBuf::from("/etc/bedweb/cert.pem"));
        assert_eq!(ssl.private_key, PathBuf::from("/etc/bedweb/key.pem"));
        assert_eq!(config.query_period, 5);
        assert_eq!(config.monitor_path, PathBuf::from("/var"));
    }

    #[test]
    fn listen_is_required() {
        let err = serde_yaml::from_str::<Config>("monitor_path: /\n").unwrap_err();
        assert!(err.to_string().contains("listen"));
    }

    #[test]
    fn zero_period_falls_back_to_one_second() {
        let config: Config =
            serde_yaml::from_str("listen: \"127.0.0.1:0\"\nqeury_period: 0\n").unwrap();
        assert_eq!(config.period(), Duration::from_secs(1));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/bedweb.yaml")).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn load_reports_parse_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bedweb.yaml");
        std::fs::write(&path, "listen: [broken\n").unwrap();
        let err = format!("{:#}", Config::load(&path).unwrap_err());
        // serde_yaml includes "line X column Y" in its message.
        assert!(err.contains("line"), "error should carry a location: {err}");
    }
}
