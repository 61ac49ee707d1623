use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scratch directory for the parse file and the base64 capture
    pub work_dir: String,
    /// External program used to view the decoded body
    pub viewer: String,
    pub color: bool,
    pub ip_lookup: IpLookupConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLookupConfig {
    pub enabled: bool,
    /// Base URL, the IP is appended as the last path segment
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub use_mock: bool, // canned answers, no network
}

impl Default for Config {
    fn default() -> Self {
        Config {
            work_dir: "/tmp/hscan".to_string(),
            viewer: "nano".to_string(),
            color: true,
            ip_lookup: IpLookupConfig::default(),
        }
    }
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        IpLookupConfig {
            enabled: true,
            endpoint: "https://ipinfo.io/".to_string(),
            timeout_seconds: 10,
            use_mock: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            log::warn!("Configuration file '{path}' not found, using default configuration");
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("work_dir: /var/tmp/scan\nip_lookup:\n  use_mock: true\n").unwrap();
        assert_eq!(config.work_dir, "/var/tmp/scan");
        assert_eq!(config.viewer, "nano");
        assert!(config.ip_lookup.use_mock);
        assert!(config.ip_lookup.enabled);
        assert_eq!(config.ip_lookup.endpoint, "https://ipinfo.io/");
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("header-scan.yaml");
        let path = path.to_string_lossy().to_string();

        let mut config = Config::default();
        config.color = false;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Config::load_or_default("/nonexistent/header-scan.yaml").unwrap();
        assert_eq!(config, Config::default());
    }
}
