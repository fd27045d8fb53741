//! Reverb configuration

use rf_core::{RfError, RfResult};
use rf_dsp::{PLACEHOLDER_LENGTH, PrepareTarget};
use serde::{Deserialize, Serialize};

use crate::slots::DEFAULT_SLOT_COUNT;

/// Tunables for the slot registry, worker pool and reverb instances.
///
/// Missing JSON fields fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    /// Number of IR slots in the registry
    pub slot_count: usize,
    /// Threads in the preparation pool
    pub worker_threads: usize,
    /// Output channels assumed before the first processed block
    pub initial_channels: usize,
    /// Block size assumed before the first processed block
    pub initial_block_size: usize,
    /// Length of the unit-impulse IR used for empty slots
    pub placeholder_length: usize,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            worker_threads: 1,
            initial_channels: 2,
            initial_block_size: 1024,
            placeholder_length: PLACEHOLDER_LENGTH,
        }
    }
}

impl ReverbConfig {
    pub fn from_json(json: &str) -> RfResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RfError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RfResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RfError::Config(e.to_string()))
    }

    pub fn validate(&self) -> RfResult<()> {
        if self.slot_count == 0 {
            return Err(RfError::Config("slot_count must be at least 1".into()));
        }
        if self.worker_threads == 0 {
            return Err(RfError::Config("worker_threads must be at least 1".into()));
        }
        if self.placeholder_length == 0 {
            return Err(RfError::Config("placeholder_length must be at least 1".into()));
        }
        PrepareTarget::new(self.initial_channels, self.initial_block_size, 1)
            .validate()
            .map_err(|e| RfError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ReverbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slot_count, 16);
        assert_eq!(config.initial_block_size, 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ReverbConfig::from_json(r#"{ "slot_count": 4, "worker_threads": 2 }"#).unwrap();
        assert_eq!(config.slot_count, 4);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.initial_channels, 2);
        assert_eq!(config.placeholder_length, 256);
    }

    #[test]
    fn test_json_round_trip() {
        let config = ReverbConfig {
            slot_count: 8,
            initial_block_size: 256,
            ..Default::default()
        };
        let parsed = ReverbConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ReverbConfig::from_json(r#"{ "slot_count": 0 }"#),
            Err(RfError::Config(_))
        ));
        assert!(matches!(
            ReverbConfig::from_json(r#"{ "initial_block_size": 1000 }"#),
            Err(RfError::Config(_))
        ));
        assert!(matches!(ReverbConfig::from_json("not json"), Err(RfError::Config(_))));
    }
}
