// ABOUTME: Configuration loading and management for murmur
// ABOUTME: Supports TOML config files with sensible defaults for every section

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `signing.secret`.
pub const SECRET_ENV_VAR: &str = "MURMUR_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Agent registry and liveness settings
    pub registry: RegistryConfig,
    /// Message routing and history settings
    pub router: RouterConfig,
    /// Transport circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Optional message signing
    pub signing: SigningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum gap since the last heartbeat before an agent is offline
    pub liveness_window_ms: u64,
    /// How often each agent's heartbeat monitor checks liveness
    pub heartbeat_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: 60_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-agent history cap; oldest entries are evicted first
    pub max_history: usize,
    /// Number of messages returned by get_messages when no limit is given
    pub default_limit: usize,
    /// Default request_response timeout
    pub request_timeout_ms: u64,
    /// Mirror published messages into transport lists
    pub persist_history: bool,
    /// Expiry applied to persisted lists
    pub queue_ttl_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            default_limit: 50,
            request_timeout_ms: 30_000,
            persist_history: false,
            queue_ttl_secs: 3600,
        }
    }
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive transport failures before the circuit opens
    pub threshold: u32,
    /// Cooldown before a half-open probe is allowed
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SigningConfig {
    /// Shared HMAC secret. Signing and verification are disabled when unset.
    pub secret: Option<String>,
}

impl Config {
    /// Get the XDG config directory for murmur (~/.config/murmur)
    pub fn config_dir() -> PathBuf {
        // Respect XDG_CONFIG_HOME if set, otherwise use ~/.config
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("murmur")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from XDG config directory
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            // No config found, use defaults
            Ok(Self::default())
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings the liveness machinery cannot run with.
    pub fn validate(&self) -> Result<()> {
        let registry = &self.registry;
        if registry.heartbeat_interval_ms == 0 {
            bail!("registry.heartbeat_interval_ms must be greater than zero");
        }
        if registry.heartbeat_interval_ms >= registry.liveness_window_ms {
            bail!(
                "registry.heartbeat_interval_ms ({}) must be less than registry.liveness_window_ms ({})",
                registry.heartbeat_interval_ms,
                registry.liveness_window_ms
            );
        }
        Ok(())
    }

    /// Apply environment overrides (currently only the signing secret).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
            if !secret.is_empty() {
                self.signing.secret = Some(secret);
            }
        }
        self
    }

    /// Generate a default config file content
    pub fn default_toml() -> String {
        r#"# murmur configuration
# Location: ~/.config/murmur/config.toml

[registry]
# Agents with no heartbeat for this long are considered offline
liveness_window_ms = 60000
# How often each agent's liveness is checked
heartbeat_interval_ms = 30000

[router]
max_history = 1000
default_limit = 50
request_timeout_ms = 30000
# Mirror messages into transport lists (queue:<agent>) with an expiry
persist_history = false
queue_ttl_secs = 3600

[circuit_breaker]
threshold = 5
timeout_ms = 60000

[signing]
# secret = "change-me"  # Or set MURMUR_SECRET
"#
        .to_string()
    }

    /// Initialize config directory and create default config if needed
    pub fn init() -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_path();

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

        // Write default config if it doesn't exist
        if !config_path.exists() {
            std::fs::write(&config_path, Self::default_toml())
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry.liveness_window(), Duration::from_secs(60));
        assert_eq!(config.registry.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.router.max_history, 1000);
        assert_eq!(config.router.default_limit, 50);
        assert_eq!(config.router.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.timeout(), Duration::from_secs(60));
        assert!(config.signing.secret.is_none());
    }

    #[test]
    fn test_default_toml_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_toml()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [router]
            max_history = 10

            [signing]
            secret = "s3cret"
        "#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.router.max_history, 10);
        assert_eq!(config.router.default_limit, 50);
        assert_eq!(config.registry.liveness_window_ms, 60_000);
        assert_eq!(config.signing.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[router\nmax_history = ").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_zero_heartbeat_interval_is_rejected() {
        let mut config = Config::default();
        config.registry.heartbeat_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_interval_must_be_shorter_than_liveness_window() {
        let mut config = Config::default();
        config.registry.heartbeat_interval_ms = config.registry.liveness_window_ms;
        assert!(config.validate().is_err());

        config.registry.heartbeat_interval_ms = config.registry.liveness_window_ms - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_validates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nheartbeat_interval_ms = 0").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(dir.path().join("nope.toml"));
        assert!(result.is_err());
    }
}
