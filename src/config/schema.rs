//! Configuration schema for stagehand
//!
//! Configuration is stored at `~/.config/stagehand/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Stage settings
    pub stage: StageConfig,

    /// Mirrors, in the order they were configured
    pub mirrors: Vec<MirrorConfig>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Staging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Candidate stage roots, tried in order. Supports `$tempdir`, `$user`,
    /// `$user_cache_path`, `$home` and `~`.
    pub build_stage: Vec<String>,

    /// Use per-stage file locks
    pub locks: bool,

    /// Seconds to wait for a stage write lock
    pub lock_timeout_secs: u64,

    /// Verify downloaded archives against their declared digest
    pub checksum: bool,

    /// Local fetch cache directory
    pub source_cache: String,

    /// Root for relocated (short path) build directories
    pub cmake_ext_build: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            build_stage: vec![
                "$tempdir/$user/stagehand-stage".to_string(),
                "$user_cache_path/stage".to_string(),
            ],
            locks: true,
            lock_timeout_secs: 60,
            checksum: true,
            source_cache: "$user_cache_path/source-cache".to_string(),
            cmake_ext_build: "$home/.stagehand-builds".to_string(),
        }
    }
}

/// A configured source mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Mirror name
    pub name: String,

    /// Base URL (or local directory) archives are fetched from
    pub fetch_url: String,

    /// Bearer token sent with fetch requests
    #[serde(default)]
    pub access_token: Option<String>,

    /// Do not mirror resources without a pinned identity
    #[serde(default)]
    pub skip_unstable_versions: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[stage]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.stage.lock_timeout_secs, 60);
        assert!(config.stage.checksum);
        assert!(config.mirrors.is_empty());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [stage]
            build_stage = ["/scratch/$user"]
            checksum = false

            [[mirrors]]
            name = "site"
            fetch_url = "https://mirror.example.org/sources"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.stage.build_stage, vec!["/scratch/$user".to_string()]);
        assert!(!config.stage.checksum);
        assert!(config.stage.locks); // default preserved
        assert_eq!(config.mirrors.len(), 1);
        assert!(!config.mirrors[0].skip_unstable_versions);
        assert!(config.mirrors[0].access_token.is_none());
    }
}
