//! Agent and environment configuration.

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_names::ContainerType;

use crate::error::{Error, Result};

// =============================================================================
// Agent Configuration
// =============================================================================

/// Static configuration of the agent hosting the provisioners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Identity of the agent, e.g. `machine-0`.
    pub tag: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether this agent runs the environ provisioner.
    pub manage_environ: bool,

    /// Container kinds this agent provisions, one provisioner each.
    pub container_types: Vec<ContainerType>,
}

impl AgentConfig {
    /// Configuration for `tag` with defaults for everything else.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            log_level: "info".to_string(),
            manage_environ: false,
            container_types: Vec::new(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> AnyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, keyed by environment variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AnyResult<Self> {
        let tag = lookup("TETHER_AGENT_TAG")
            .filter(|s| !s.is_empty())
            .context("TETHER_AGENT_TAG must be set")?;

        let mut config = Self::new(tag);

        if let Some(log_level) = lookup("TETHER_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(manage) = lookup("TETHER_MANAGE_ENVIRON") {
            config.manage_environ = manage
                .parse()
                .with_context(|| format!("invalid TETHER_MANAGE_ENVIRON {manage:?}"))?;
        }

        if let Some(kinds) = lookup("TETHER_CONTAINER_TYPES") {
            config.container_types = kinds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<ContainerType>())
                .collect::<std::result::Result<_, _>>()
                .context("invalid TETHER_CONTAINER_TYPES")?;
        }

        Ok(config)
    }
}

// =============================================================================
// Environment Configuration
// =============================================================================

const NAME: &str = "name";
const TYPE: &str = "type";
const SAFE_MODE: &str = "provisioner-safe-mode";

/// Validated environment configuration.
///
/// Wraps the raw attribute map served by the state client. `name` and `type`
/// are required strings; `provisioner-safe-mode` is an optional boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct EnvironConfig {
    attrs: Map<String, Value>,
}

impl EnvironConfig {
    /// Validate an attribute map.
    pub fn new(attrs: Map<String, Value>) -> Result<Self> {
        for key in [NAME, TYPE] {
            match attrs.get(key) {
                Some(Value::String(s)) if !s.is_empty() => {}
                Some(_) => {
                    return Err(Error::InvalidConfig(format!("{key} must be a non-empty string")))
                }
                None => return Err(Error::InvalidConfig(format!("{key} is required"))),
            }
        }

        match attrs.get(SAFE_MODE) {
            None | Some(Value::Bool(_)) => {}
            Some(other) => {
                return Err(Error::InvalidConfig(format!(
                    "{SAFE_MODE} must be a boolean, got {other}"
                )))
            }
        }

        Ok(Self { attrs })
    }

    /// Validate a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(attrs) => Self::new(attrs),
            other => Err(Error::InvalidConfig(format!(
                "expected an attribute map, got {other}"
            ))),
        }
    }

    /// Environment name.
    pub fn name(&self) -> &str {
        self.str_attr(NAME)
    }

    /// Provider type used to open the environment.
    pub fn environ_type(&self) -> &str {
        self.str_attr(TYPE)
    }

    /// Whether the provisioner must leave unknown instances alone.
    pub fn provisioner_safe_mode(&self) -> bool {
        matches!(self.attrs.get(SAFE_MODE), Some(Value::Bool(true)))
    }

    /// Raw attribute lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// All attributes.
    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    fn str_attr(&self, key: &str) -> &str {
        self.attrs.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

impl TryFrom<Map<String, Value>> for EnvironConfig {
    type Error = Error;

    fn try_from(attrs: Map<String, Value>) -> Result<Self> {
        Self::new(attrs)
    }
}

impl From<EnvironConfig> for Map<String, Value> {
    fn from(config: EnvironConfig) -> Self {
        config.attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_environ_config_accessors() {
        let config = EnvironConfig::from_value(json!({
            "name": "prod",
            "type": "openstack",
            "provisioner-safe-mode": true,
            "region": "us-east-1",
        }))
        .unwrap();

        assert_eq!(config.name(), "prod");
        assert_eq!(config.environ_type(), "openstack");
        assert!(config.provisioner_safe_mode());
        assert_eq!(config.get("region"), Some(&json!("us-east-1")));
    }

    #[test]
    fn test_safe_mode_defaults_off() {
        let config = EnvironConfig::from_value(json!({"name": "dev", "type": "dummy"})).unwrap();
        assert!(!config.provisioner_safe_mode());
    }

    #[rstest]
    #[case(json!({"type": "dummy"}))]
    #[case(json!({"name": "", "type": "dummy"}))]
    #[case(json!({"name": "dev", "type": 7}))]
    #[case(json!({"name": "dev", "type": "dummy", "provisioner-safe-mode": "yes"}))]
    #[case(json!(["name", "dev"]))]
    fn test_invalid_environ_config(#[case] value: Value) {
        assert!(matches!(
            EnvironConfig::from_value(value),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_environ_config_serde_validates() {
        let config: EnvironConfig =
            serde_json::from_value(json!({"name": "dev", "type": "dummy"})).unwrap();
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"name": "dev", "type": "dummy"})
        );

        assert!(serde_json::from_value::<EnvironConfig>(json!({"name": "dev"})).is_err());
    }

    #[test]
    fn test_agent_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TETHER_AGENT_TAG", "machine-0"),
            ("TETHER_MANAGE_ENVIRON", "true"),
            ("TETHER_CONTAINER_TYPES", "lxd, kvm"),
        ]);

        let config = AgentConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.tag, "machine-0");
        assert!(config.manage_environ);
        assert_eq!(
            config.container_types,
            vec![ContainerType::Lxd, ContainerType::Kvm]
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_agent_config_requires_tag() {
        assert!(AgentConfig::from_lookup(|_| None).is_err());
    }

    #[test]
    fn test_agent_config_rejects_unknown_container_type() {
        let err = AgentConfig::from_lookup(|k| match k {
            "TETHER_AGENT_TAG" => Some("machine-0".to_string()),
            "TETHER_CONTAINER_TYPES" => Some("lxd,docker".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("TETHER_CONTAINER_TYPES"));
    }
}
