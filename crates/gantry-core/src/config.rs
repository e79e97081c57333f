//! gantry.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default batcher idle window.
pub const DEFAULT_BATCH_IDLE_WINDOW: Duration = Duration::from_secs(1);
/// Default batcher max window.
pub const DEFAULT_BATCH_MAX_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GantryConfig {
    pub cluster: ClusterConfig,
    pub provisioning: Option<ProvisioningConfig>,
    pub aws: Option<AwsConfig>,
    /// Log verbosity passed to the tracing env filter (e.g. "info",
    /// "debug", "gantry_provision=trace").
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name handed to node bootstrap.
    pub name: String,
    /// API endpoint handed to node bootstrap.
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Quiet period that closes a batch (e.g. "1s").
    pub batch_idle_window: Option<String>,
    /// Hard cap on a batch window (e.g. "10s").
    pub batch_max_window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// IAM instance profile used when a provisioner does not override it.
    pub default_instance_profile: Option<String>,
}

impl GantryConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GantryConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn batch_idle_window(&self) -> Duration {
        self.provisioning
            .as_ref()
            .and_then(|p| p.batch_idle_window.as_deref())
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(DEFAULT_BATCH_IDLE_WINDOW)
    }

    pub fn batch_max_window(&self) -> Duration {
        self.provisioning
            .as_ref()
            .and_then(|p| p.batch_max_window.as_deref())
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(DEFAULT_BATCH_MAX_WINDOW)
    }
}

/// Parse a duration string like "500ms", "30s", "5m".
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let parse = |digits: &str| {
        digits
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidDuration(s.to_string()))
    };
    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(ms)?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(secs)?))
    } else if let Some(mins) = s.strip_suffix('m') {
        Ok(Duration::from_secs(parse(mins)? * 60))
    } else {
        Err(CoreError::InvalidDuration(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
[cluster]
name = "test"
endpoint = "https://10.0.0.1"
"#;
        let config: GantryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cluster.name, "test");
        assert_eq!(config.batch_idle_window(), DEFAULT_BATCH_IDLE_WINDOW);
        assert_eq!(config.batch_max_window(), DEFAULT_BATCH_MAX_WINDOW);
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
log_level = "debug"

[cluster]
name = "prod"
endpoint = "https://api.prod.internal"

[provisioning]
batch_idle_window = "500ms"
batch_max_window = "5s"

[aws]
default_instance_profile = "GantryNodeProfile"
"#;
        let config: GantryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batch_idle_window(), Duration::from_millis(500));
        assert_eq!(config.batch_max_window(), Duration::from_secs(5));
        assert_eq!(
            config.aws.unwrap().default_instance_profile.as_deref(),
            Some("GantryNodeProfile")
        );
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = GantryConfig {
            cluster: ClusterConfig {
                name: "test".to_string(),
                endpoint: "https://localhost:6443".to_string(),
            },
            provisioning: Some(ProvisioningConfig {
                batch_idle_window: Some("1s".to_string()),
                batch_max_window: Some("10s".to_string()),
            }),
            aws: None,
            log_level: None,
        };
        let rendered = config.to_toml_string().unwrap();
        let parsed: GantryConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cluster.name, "test");
        assert_eq!(parsed.batch_max_window(), Duration::from_secs(10));
    }
}
