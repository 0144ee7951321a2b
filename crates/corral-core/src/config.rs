//! corral.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

const DEFAULT_STORE_PATH: &str = "/var/lib/corral/corral.redb";
const DEFAULT_COORDINATOR_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);
const DEFAULT_LOG_FILTER: &str = "info,corral=debug,corrald=debug";

/// Top-level configuration. All sections are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorralConfig {
    pub store: Option<StoreSection>,
    pub coordinator: Option<CoordinatorSection>,
    pub locks: Option<LocksSection>,
    pub health: Option<HealthSection>,
    pub log: Option<LogSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Upper bound on a single coordinator call (e.g. "10s").
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocksSection {
    /// Sleep between attempts of a retried tenant unlock.
    pub retry_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    /// How long a cached health-check result stays valid.
    pub cache_ttl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    pub filter: Option<String>,
    pub json: Option<bool>,
}

impl CorralConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: CorralConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject duration strings that cannot be parsed.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("coordinator.timeout", self.coordinator.as_ref().and_then(|c| c.timeout.as_deref())),
            ("locks.retry_interval", self.locks.as_ref().and_then(|l| l.retry_interval.as_deref())),
            ("health.cache_ttl", self.health.as_ref().and_then(|h| h.cache_ttl.as_deref())),
        ];
        for (field, value) in durations {
            if let Some(v) = value {
                if parse_duration(v).is_none() {
                    anyhow::bail!("invalid duration for {field}: {v:?}");
                }
            }
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn coordinator_timeout(&self) -> Duration {
        self.coordinator
            .as_ref()
            .and_then(|c| c.timeout.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_COORDINATOR_TIMEOUT)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        self.locks
            .as_ref()
            .and_then(|l| l.retry_interval.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_RETRY_INTERVAL)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        self.health
            .as_ref()
            .and_then(|h| h.cache_ttl.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_HEALTH_TTL)
    }

    pub fn log_filter(&self) -> String {
        self.log
            .as_ref()
            .and_then(|l| l.filter.clone())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn log_json(&self) -> bool {
        self.log.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CorralConfig = toml::from_str("").unwrap();
        assert_eq!(config.store_path(), PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(config.coordinator_timeout(), Duration::from_secs(10));
        assert_eq!(config.lock_retry_interval(), Duration::from_secs(1));
        assert_eq!(config.health_cache_ttl(), Duration::from_secs(30));
        assert!(!config.log_json());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[store]
path = "/tmp/corral.redb"

[coordinator]
timeout = "500ms"

[locks]
retry_interval = "2s"

[health]
cache_ttl = "1m"

[log]
filter = "debug"
json = true
"#;
        let config: CorralConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/corral.redb"));
        assert_eq!(config.coordinator_timeout(), Duration::from_millis(500));
        assert_eq!(config.lock_retry_interval(), Duration::from_secs(2));
        assert_eq!(config.health_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.log_filter(), "debug");
        assert!(config.log_json());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let config: CorralConfig = toml::from_str("[locks]\nretry_interval = \"often\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("locks.retry_interval"));
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.toml");
        std::fs::write(&path, "[coordinator]\ntimeout = \"3s\"\n").unwrap();

        let config = CorralConfig::from_file(&path).unwrap();
        assert_eq!(config.coordinator_timeout(), Duration::from_secs(3));
        assert!(config.to_toml_string().unwrap().contains("3s"));
    }
}
