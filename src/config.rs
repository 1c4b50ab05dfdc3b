//! VM configuration and limits.

use crate::machine::gas::{BLOCK_GAS_LIMIT, GasSchedule};
use crate::utils::log::Level;
use realmvm_derive::Error;

/// Gas available to one transaction unless configured otherwise.
pub const DEFAULT_TX_GAS_LIMIT: u64 = 10_000_000;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// A scope's slot index is a `u16`.
pub const MAX_NAMES_PER_SCOPE: usize = u16::MAX as usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must not exceed {max}")]
    OutOfRange { key: &'static str, max: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub chain_id: String,
    pub max_gas_per_tx: u64,
    pub max_call_depth: usize,
    pub gas: GasSchedule,
    pub log_level: Level,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            chain_id: "dev".to_string(),
            max_gas_per_tx: DEFAULT_TX_GAS_LIMIT,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            gas: GasSchedule::default(),
            log_level: Level::Info,
        }
    }
}

impl VmConfig {
    /// Defaults overridden by `REALMVM_MAX_GAS`, `REALMVM_MAX_CALL_DEPTH`
    /// and `REALMVM_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("REALMVM_MAX_GAS") {
            let gas: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "REALMVM_MAX_GAS",
                value: raw.clone(),
            })?;
            if gas > BLOCK_GAS_LIMIT {
                return Err(ConfigError::OutOfRange {
                    key: "REALMVM_MAX_GAS",
                    max: BLOCK_GAS_LIMIT,
                });
            }
            config.max_gas_per_tx = gas;
        }
        if let Some(raw) = lookup("REALMVM_MAX_CALL_DEPTH") {
            config.max_call_depth = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "REALMVM_MAX_CALL_DEPTH",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("REALMVM_LOG") {
            config.log_level = Level::parse(&raw).ok_or(ConfigError::InvalidValue {
                key: "REALMVM_LOG",
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = VmConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, VmConfig::default());
        assert_eq!(config.max_gas_per_tx, DEFAULT_TX_GAS_LIMIT);
    }

    #[test]
    fn overrides_apply() {
        let config = VmConfig::from_lookup(lookup(&[
            ("REALMVM_MAX_GAS", "5000"),
            ("REALMVM_MAX_CALL_DEPTH", "16"),
            ("REALMVM_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.max_gas_per_tx, 5000);
        assert_eq!(config.max_call_depth, 16);
        assert_eq!(config.log_level, Level::Debug);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            VmConfig::from_lookup(lookup(&[("REALMVM_MAX_GAS", "lots")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            VmConfig::from_lookup(lookup(&[("REALMVM_MAX_GAS", "999999999999")])),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(VmConfig::from_lookup(lookup(&[("REALMVM_LOG", "chatty")])).is_err());
    }
}
