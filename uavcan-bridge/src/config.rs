//! Bridge configuration.
//!
//! Priority order when building:
//! 1. A config passed with `BridgeBuilder::with_config`
//! 2. A JSON5 file passed with `BridgeBuilder::with_config_file`
//! 3. A JSON5 file named by `UAVCAN_BRIDGE_CONFIG_FILE`
//! 4. Defaults
//!
//! `UAVCAN_BRIDGE_CONFIG_OVERRIDE='key=value;key=value'` is applied on top,
//! then the builder's `with_json` overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::NodeId;
use crate::error::{Error, Result};

pub const CONFIG_FILE_ENV: &str = "UAVCAN_BRIDGE_CONFIG_FILE";
pub const CONFIG_OVERRIDE_ENV: &str = "UAVCAN_BRIDGE_CONFIG_OVERRIDE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// This node's own address, excluded from every node walk. 0 = none.
    pub local_node_id: u8,
    /// Bus I/O budget per tick.
    pub spin_interval_ms: u64,
    /// Queue depth of the inbound and outbound topics.
    pub topic_depth: usize,
    /// Remote parameter holding a controller's ESC index.
    pub esc_parameter_name: String,
    /// Timeout sent with "begin enumeration"; 65535 means no timeout.
    pub enumeration_timeout_sec: u16,
    /// How many index claims may be in flight at once.
    pub claim_concurrency: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_node_id: 0,
            spin_interval_ms: 10,
            topic_depth: 1,
            esc_parameter_name: "esc_index".to_string(),
            enumeration_timeout_sec: u16::MAX,
            claim_concurrency: 127,
        }
    }
}

impl BridgeConfig {
    pub fn from_json5(text: &str) -> Result<Self> {
        Ok(json5::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json5(&text)
    }

    /// Replace the top-level field `key` with `value`.
    pub fn with_override(self, key: &str, value: serde_json::Value) -> Result<Self> {
        let mut tree = serde_json::to_value(&self)?;
        let Some(fields) = tree.as_object_mut() else {
            return Err(Error::InvalidConfig("config is not an object".into()));
        };
        if !fields.contains_key(key) {
            return Err(Error::InvalidOverride(format!("{key}={value}")));
        }
        fields.insert(key.to_string(), value);
        Ok(serde_json::from_value(tree)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spin_interval_ms == 0 {
            return Err(Error::InvalidConfig("spin_interval_ms must be positive".into()));
        }
        if self.topic_depth == 0 {
            return Err(Error::InvalidConfig("topic_depth must be positive".into()));
        }
        if self.local_node_id != 0 && NodeId::new(self.local_node_id).is_none() {
            return Err(Error::InvalidConfig(format!(
                "local_node_id {} is outside [1, 127]",
                self.local_node_id
            )));
        }
        if self.esc_parameter_name.is_empty() {
            return Err(Error::InvalidConfig("esc_parameter_name is empty".into()));
        }
        if self.claim_concurrency == 0 {
            return Err(Error::InvalidConfig("claim_concurrency must be positive".into()));
        }
        Ok(())
    }

    pub fn local_node(&self) -> Option<NodeId> {
        NodeId::new(self.local_node_id)
    }

    pub fn spin_interval(&self) -> Duration {
        Duration::from_millis(self.spin_interval_ms)
    }
}

/// Parse `key1=value1;key2=value2` where every value is JSON5.
pub fn parse_overrides(text: &str) -> Result<Vec<(String, serde_json::Value)>> {
    let mut overrides = Vec::new();
    for pair in text.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::InvalidOverride(pair.to_string()));
        };
        let value: serde_json::Value = json5::from_str(value.trim())?;
        debug!("Override: {} = {}", key.trim(), value);
        overrides.push((key.trim().to_string(), value));
    }
    Ok(overrides)
}

/// Resolve the effective configuration, reading the process environment.
pub fn load(
    base: Option<BridgeConfig>,
    file: Option<&Path>,
    overrides: &[(String, serde_json::Value)],
) -> Result<BridgeConfig> {
    let env_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
    let env_overrides = std::env::var(CONFIG_OVERRIDE_ENV).ok();
    load_from(base, file, env_file.as_deref(), env_overrides.as_deref(), overrides)
}

/// [`load`] with the environment passed in explicitly.
pub fn load_from(
    base: Option<BridgeConfig>,
    file: Option<&Path>,
    env_file: Option<&Path>,
    env_overrides: Option<&str>,
    overrides: &[(String, serde_json::Value)],
) -> Result<BridgeConfig> {
    let mut config = match (base, file, env_file) {
        (Some(config), _, _) => config,
        (None, Some(path), _) => {
            debug!("[CFG] Loading config from {}", path.display());
            BridgeConfig::from_file(path)?
        }
        (None, None, Some(path)) => {
            debug!("[CFG] Loading config from ${CONFIG_FILE_ENV}={}", path.display());
            BridgeConfig::from_file(path)?
        }
        (None, None, None) => BridgeConfig::default(),
    };

    if let Some(text) = env_overrides {
        for (key, value) in parse_overrides(text)? {
            config = config.with_override(&key, value)?;
        }
    }
    for (key, value) in overrides {
        config = config.with_override(key, value.clone())?;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.local_node(), None);
        assert_eq!(config.spin_interval(), Duration::from_millis(10));
        assert_eq!(config.enumeration_timeout_sec, 65535);
    }

    #[test]
    fn test_partial_json5() {
        let config = BridgeConfig::from_json5("{ local_node_id: 1, /* comment */ topic_depth: 4 }")
            .unwrap();
        assert_eq!(config.local_node_id, 1);
        assert_eq!(config.topic_depth, 4);
        assert_eq!(config.esc_parameter_name, "esc_index");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(BridgeConfig::from_json5("{ spin_ms: 5 }").is_err());
    }

    #[test]
    fn test_parse_overrides() {
        let parsed = parse_overrides("spin_interval_ms=5; esc_parameter_name='idx';").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("spin_interval_ms".to_string(), json!(5)),
                ("esc_parameter_name".to_string(), json!("idx")),
            ]
        );
        assert!(matches!(
            parse_overrides("novalue"),
            Err(Error::InvalidOverride(_))
        ));
    }

    #[test]
    fn test_programmatic_overrides_win() {
        let config = load_from(
            None,
            None,
            None,
            Some("spin_interval_ms=5"),
            &[("spin_interval_ms".to_string(), json!(7))],
        )
        .unwrap();
        assert_eq!(config.spin_interval_ms, 7);
    }

    #[test]
    fn test_override_unknown_key() {
        let err = BridgeConfig::default()
            .with_override("bogus", json!(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOverride(_)));
    }

    #[test]
    fn test_validation() {
        let overrides = [("local_node_id".to_string(), json!(200))];
        assert!(matches!(
            load_from(None, None, None, None, &overrides),
            Err(Error::InvalidConfig(_))
        ));
        let overrides = [("spin_interval_ms".to_string(), json!(0))];
        assert!(load_from(None, None, None, None, &overrides).is_err());
    }

    #[test]
    fn test_explicit_base_beats_files() {
        let base = BridgeConfig {
            topic_depth: 3,
            ..Default::default()
        };
        let missing = Path::new("/nonexistent/bridge.json5");
        let config = load_from(Some(base), Some(missing), Some(missing), None, &[]).unwrap();
        assert_eq!(config.topic_depth, 3);
        assert!(load_from(None, Some(missing), None, None, &[]).is_err());
    }
}
