//! Conductor configuration
//!
//! Layered like the rest of our tooling: hardcoded defaults, then an optional
//! TOML file, then environment variables. Every value is bounds-checked by
//! [`ConductorConfig::validate`] before a conductor is built from it.

pub mod error;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

pub use error::ConfigError;
use error::ParseTomlSnafu;
use error::ReadFileSnafu;

use crate::constants::DEFAULT_EXTERNAL_PORT_BASE;
use crate::constants::DEFAULT_NAME_PREFIX;
use crate::constants::DEFAULT_ONLINE_TIMEOUT;
use crate::constants::DEFAULT_POLL_INTERVAL;
use crate::constants::DEFAULT_SERVICE_PORT;
use crate::constants::MAX_CLUSTER_NODES;
use crate::constants::MAX_ONLINE_TIMEOUT;
use crate::constants::MAX_SUBNET_ATTEMPTS;

/// Environment variable naming an explicit config file.
pub const CONFIG_FILE_ENV: &str = "KVS_CONDUCTOR_CONFIG";

/// Config file picked up from the working directory when present.
pub const LOCAL_CONFIG_FILE: &str = "./kvs-conductor.toml";

/// Settings for one conductor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Test group id; namespaces every container and network of a run.
    pub group_id: String,
    /// Prefix shared by all runs, used by all-runs cleanup sweeps.
    pub name_prefix: String,
    /// Image the node containers run.
    pub base_image: String,
    /// Host port of node 0; node `i` is published on `external_port_base + i`.
    pub external_port_base: u16,
    /// Port the node process listens on inside its container.
    pub service_port: u16,
    /// Budget for nodes to answer their health endpoint (milliseconds).
    pub online_timeout_ms: u64,
    /// Interval between health probes (milliseconds).
    pub poll_interval_ms: u64,
    /// Candidate subnets tried per network before giving up.
    pub max_subnet_attempts: u32,
    /// The docker client binary.
    pub docker_binary: String,
    /// Skip building the node image and use whatever is tagged `base_image`.
    pub skip_image_build: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            group_id: "default".to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            base_image: "kvstore-test".to_string(),
            external_port_base: DEFAULT_EXTERNAL_PORT_BASE,
            service_port: DEFAULT_SERVICE_PORT,
            online_timeout_ms: DEFAULT_ONLINE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            max_subnet_attempts: MAX_SUBNET_ATTEMPTS,
            docker_binary: "docker".to_string(),
            skip_image_build: false,
        }
    }
}

impl ConductorConfig {
    /// Defaults for a specific group and image.
    pub fn for_group(group_id: impl Into<String>, base_image: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            base_image: base_image.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&contents).context(ParseTomlSnafu { path })
    }

    /// Load configuration with layered approach:
    /// 1. Start with defaults
    /// 2. Load from TOML file if one exists
    /// 3. Override with environment variables
    ///
    /// The file is `$KVS_CONDUCTOR_CONFIG` if set, else `./kvs-conductor.toml`.
    /// The result is validated.
    pub fn load_with_layers() -> Result<Self, ConfigError> {
        let mut config = Self::load_toml_with_fallbacks()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_toml_with_fallbacks() -> Result<Self, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            let path = Path::new(&config_path);
            if path.exists() {
                tracing::info!(path = %config_path, "Loading conductor configuration");
                return Self::from_toml_file(path);
            }
            tracing::warn!(path = %config_path, "{CONFIG_FILE_ENV} specified but not found");
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            tracing::info!(path = LOCAL_CONFIG_FILE, "Loading conductor configuration");
            return Self::from_toml_file(local);
        }

        tracing::debug!("No conductor configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `KVS_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = lookup("KVS_GROUP_ID") {
            self.group_id = val;
        }
        if let Some(val) = lookup("KVS_NAME_PREFIX") {
            self.name_prefix = val;
        }
        if let Some(val) = lookup("KVS_BASE_IMAGE") {
            self.base_image = val;
        }
        if let Some(val) = lookup("KVS_PORT_BASE") {
            self.external_port_base = parse_env("KVS_PORT_BASE", &val, "must be a valid port number")?;
        }
        if let Some(val) = lookup("KVS_SERVICE_PORT") {
            self.service_port = parse_env("KVS_SERVICE_PORT", &val, "must be a valid port number")?;
        }
        if let Some(val) = lookup("KVS_ONLINE_TIMEOUT_MS") {
            self.online_timeout_ms = parse_env("KVS_ONLINE_TIMEOUT_MS", &val, "must be milliseconds")?;
        }
        if let Some(val) = lookup("KVS_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("KVS_POLL_INTERVAL_MS", &val, "must be milliseconds")?;
        }
        if let Some(val) = lookup("KVS_DOCKER_BIN") {
            self.docker_binary = val;
        }
        if let Some(val) = lookup("KVS_SKIP_BUILD") {
            self.skip_image_build = val == "1" || val.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Check every value is within its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [("group_id", &self.group_id), ("name_prefix", &self.name_prefix)] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(ConfigError::invalid(key, value, "must be non-empty ASCII letters, digits or '-'"));
            }
        }

        if self.base_image.trim().is_empty() {
            return Err(ConfigError::invalid("base_image", &self.base_image, "must not be empty"));
        }

        if self.service_port == 0 {
            return Err(ConfigError::invalid("service_port", self.service_port, "must be non-zero"));
        }

        let last_port = u32::from(self.external_port_base) + MAX_CLUSTER_NODES as u32;
        if self.external_port_base == 0 || last_port > u32::from(u16::MAX) {
            return Err(ConfigError::invalid(
                "external_port_base",
                self.external_port_base,
                format!("must leave room for {MAX_CLUSTER_NODES} nodes below 65536"),
            ));
        }

        let max_timeout_ms = MAX_ONLINE_TIMEOUT.as_millis() as u64;
        if !(1..=max_timeout_ms).contains(&self.online_timeout_ms) {
            return Err(ConfigError::invalid(
                "online_timeout_ms",
                self.online_timeout_ms,
                format!("must be between 1 and {max_timeout_ms}"),
            ));
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.online_timeout_ms {
            return Err(ConfigError::invalid(
                "poll_interval_ms",
                self.poll_interval_ms,
                "must be >= 1 and <= online_timeout_ms",
            ));
        }

        if !(1..=100).contains(&self.max_subnet_attempts) {
            return Err(ConfigError::invalid(
                "max_subnet_attempts",
                self.max_subnet_attempts,
                "must be between 1 and 100",
            ));
        }

        if self.docker_binary.trim().is_empty() {
            return Err(ConfigError::invalid("docker_binary", &self.docker_binary, "must not be empty"));
        }

        Ok(())
    }

    /// Online wait budget.
    pub fn online_timeout(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }

    /// Health probe interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str, reason: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::invalid(key, value, format!("{reason}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConductorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConductorConfig::default();
        config
            .apply_overrides_from(lookup(&[
                ("KVS_GROUP_ID", "hw4"),
                ("KVS_PORT_BASE", "9000"),
                ("KVS_ONLINE_TIMEOUT_MS", "2500"),
                ("KVS_SKIP_BUILD", "1"),
            ]))
            .unwrap();

        assert_eq!(config.group_id, "hw4");
        assert_eq!(config.external_port_base, 9000);
        assert_eq!(config.online_timeout(), Duration::from_millis(2500));
        assert!(config.skip_image_build);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = ConductorConfig::default();
        let err = config.apply_overrides_from(lookup(&[("KVS_PORT_BASE", "ninety")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "KVS_PORT_BASE"));
    }

    #[test]
    fn test_group_id_validation() {
        let mut config = ConductorConfig::default();

        config.group_id = String::new();
        assert!(config.validate().is_err());

        config.group_id = "has_underscore".to_string();
        assert!(config.validate().is_err());

        config.group_id = "run-42".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_range_validation() {
        let mut config = ConductorConfig::default();

        config.external_port_base = 65500;
        assert!(config.validate().is_err());

        config.external_port_base = 0;
        assert!(config.validate().is_err());

        config.external_port_base = 9000;
        config.service_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timing_validation() {
        let mut config = ConductorConfig::default();

        config.online_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.online_timeout_ms = 1000;
        config.poll_interval_ms = 2000;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 100;
        config.max_subnet_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "group_id = \"hw3\"\nexternal_port_base = 9100").unwrap();

        let config = ConductorConfig::from_toml_file(file.path()).unwrap();

        assert_eq!(config.group_id, "hw3");
        assert_eq!(config.external_port_base, 9100);
        assert_eq!(config.service_port, DEFAULT_SERVICE_PORT);
        assert_eq!(config.name_prefix, "kvs");
    }

    #[test]
    fn test_from_toml_file_errors() {
        let missing = ConductorConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "external_port_base = \"high\"").unwrap();
        let bad = ConductorConfig::from_toml_file(file.path()).unwrap_err();
        assert!(matches!(bad, ConfigError::ParseToml { .. }));
    }
}
