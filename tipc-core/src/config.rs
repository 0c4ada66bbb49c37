//! Networking configuration
//!
//! Defaults are compiled in; selected fields can be overridden from the
//! environment. Nothing is read from disk.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for crate::Error {
    fn from(error: ConfigError) -> Self {
        crate::Error::InvalidArgument(error.to_string())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Visibility scope of a bound service address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Scope {
    Zone = 1,
    Cluster = 2,
    Node = 3,
}

impl Scope {
    pub fn as_raw(self) -> i8 {
        self as i8
    }

    pub fn from_raw(raw: i8) -> Option<Scope> {
        match raw {
            1 => Some(Scope::Zone),
            2 => Some(Scope::Cluster),
            3 => Some(Scope::Node),
            _ => None,
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Cluster
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Zone => "zone",
            Scope::Cluster => "cluster",
            Scope::Node => "node",
        })
    }
}

impl FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zone" => Ok(Scope::Zone),
            "cluster" => Ok(Scope::Cluster),
            "node" => Ok(Scope::Node),
            other => Err(ConfigError::Environment(format!("Invalid scope: {}", other))),
        }
    }
}

/// Socket-layer settings shared by listeners, dialers and the topology client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,

    /// Bound on connection establishment; `None` waits indefinitely
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub default_scope: Scope,

    /// Node whose topology service is dialed; 0 is the local node
    #[serde(default)]
    pub topology_node: u32,
}

fn default_listen_backlog() -> i32 {
    128
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_backlog: default_listen_backlog(),
            connect_timeout_ms: None,
            default_scope: Scope::default(),
            topology_node: 0,
        }
    }
}

impl NetConfig {
    /// Defaults with environment overrides applied, then validated
    pub fn from_env() -> ConfigResult<Self> {
        let config = EnvOverride::apply(Self::default())?;
        config.validate()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.listen_backlog <= 0 {
            return Err(ConfigError::Validation(
                "listen_backlog must be positive".to_string(),
            ));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment variable override utility
pub struct EnvOverride;

impl EnvOverride {
    /// Apply `TIPC_*` environment variables to `config`
    pub fn apply(config: NetConfig) -> ConfigResult<NetConfig> {
        Self::apply_from(config, |key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_from<F>(mut config: NetConfig, lookup: F) -> ConfigResult<NetConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backlog) = lookup("TIPC_LISTEN_BACKLOG") {
            config.listen_backlog = backlog
                .trim()
                .parse()
                .map_err(|_| ConfigError::Environment("Invalid TIPC_LISTEN_BACKLOG".to_string()))?;
        }
        if let Some(timeout) = lookup("TIPC_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_optional_millis(&timeout)?;
        }
        if let Some(scope) = lookup("TIPC_DEFAULT_SCOPE") {
            config.default_scope = scope.parse()?;
        }
        if let Some(node) = lookup("TIPC_TOPOLOGY_NODE") {
            config.topology_node = parse_node(&node)?;
        }

        Ok(config)
    }
}

/// Empty or `none` disables the bound
fn parse_optional_millis(value: &str) -> ConfigResult<Option<u64>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Environment("Invalid TIPC_CONNECT_TIMEOUT_MS".to_string()))
}

/// Decimal or `0x`-prefixed hex, as node addresses are usually printed in hex
fn parse_node(value: &str) -> ConfigResult<u32> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| ConfigError::Environment("Invalid TIPC_TOPOLOGY_NODE".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        let config = NetConfig::default();
        assert_eq!(config.listen_backlog, 128);
        assert_eq!(config.connect_timeout_ms, None);
        assert_eq!(config.default_scope, Scope::Cluster);
        assert_eq!(config.topology_node, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_apply() {
        let config = EnvOverride::apply_from(
            NetConfig::default(),
            lookup(&[
                ("TIPC_LISTEN_BACKLOG", "16"),
                ("TIPC_CONNECT_TIMEOUT_MS", "250"),
                ("TIPC_DEFAULT_SCOPE", "Node"),
                ("TIPC_TOPOLOGY_NODE", "0x1001002"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listen_backlog, 16);
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.default_scope, Scope::Node);
        assert_eq!(config.topology_node, 0x0100_1002);
    }

    #[test]
    fn test_env_timeout_can_be_cleared() {
        let base = NetConfig {
            connect_timeout_ms: Some(10),
            ..NetConfig::default()
        };
        let config =
            EnvOverride::apply_from(base, lookup(&[("TIPC_CONNECT_TIMEOUT_MS", "none")])).unwrap();
        assert_eq!(config.connect_timeout_ms, None);
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let err = EnvOverride::apply_from(
            NetConfig::default(),
            lookup(&[("TIPC_LISTEN_BACKLOG", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Environment(_)));

        let err = EnvOverride::apply_from(
            NetConfig::default(),
            lookup(&[("TIPC_DEFAULT_SCOPE", "galaxy")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Environment(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = NetConfig {
            listen_backlog: 0,
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let config = NetConfig {
            connect_timeout_ms: Some(0),
            ..NetConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: NetConfig = serde_json::from_str(r#"{"default_scope":"zone"}"#).unwrap();
        assert_eq!(config.listen_backlog, 128);
        assert_eq!(config.default_scope, Scope::Zone);

        let json = serde_json::to_string(&NetConfig::default()).unwrap();
        assert!(json.contains("\"cluster\""));
    }

    #[test]
    fn test_scope_raw_values() {
        assert_eq!(Scope::Zone.as_raw(), 1);
        assert_eq!(Scope::from_raw(3), Some(Scope::Node));
        assert_eq!(Scope::from_raw(0), None);
    }
}
