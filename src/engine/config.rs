//! Engine configuration.
//!
//! [`EcsConfig`] is read once at startup, either built in code or parsed from
//! TOML, and handed to [`EntityManager`](crate::engine::manager::EntityManager)
//! and [`ScheduleBuilder`](crate::engine::scheduler::ScheduleBuilder).
//!
//! ```toml
//! worker_threads = 4
//! initial_capacity = 64
//! max_entity_id = 1000000
//! thread_name_prefix = "sim-worker"
//! ```

use serde::Deserialize;

use crate::engine::error::ConfigError;
use crate::engine::types::MIN_CAPACITY;


/// Runtime configuration shared by entity storage and the scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcsConfig {
    /// Worker threads in the scheduler pool. `0` lets rayon decide.
    pub worker_threads: usize,

    /// Capacity of a freshly constructed archetype storage.
    pub initial_capacity: usize,

    /// Exclusive upper bound for numeric entity ids of one archetype.
    pub max_entity_id: u32,

    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            initial_capacity: MIN_CAPACITY,
            max_entity_id: u32::MAX,
            thread_name_prefix: "strata-worker".to_owned(),
        }
    }
}

impl EcsConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EcsConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field values that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entity_id == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_entity_id",
                reason: "must allow at least one entity",
            });
        }
        Ok(())
    }

    /// Initial storage capacity rounded up to a power of two, never below [`MIN_CAPACITY`].
    pub fn storage_capacity(&self) -> usize {
        self.initial_capacity.max(MIN_CAPACITY).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_documents_with_defaults() {
        let config = EcsConfig::from_toml_str("worker_threads = 2\ninitial_capacity = 20").unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.storage_capacity(), 32);
        assert_eq!(config.max_entity_id, u32::MAX);
    }

    #[test]
    fn small_capacities_clamp_to_minimum() {
        let config = EcsConfig { initial_capacity: 3, ..EcsConfig::default() };
        assert_eq!(config.storage_capacity(), MIN_CAPACITY);
    }

    #[test]
    fn rejects_unknown_keys_and_empty_id_space() {
        assert!(matches!(EcsConfig::from_toml_str("bogus = 1"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            EcsConfig::from_toml_str("max_entity_id = 0"),
            Err(ConfigError::InvalidValue { field: "max_entity_id", .. })
        ));
    }
}
