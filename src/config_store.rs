// Config Store Module
// Loads and saves the eight named configuration parameters through a
// namespaced key-value backend. Loading never fails the boot: a missing or
// unreadable store yields the compiled-in defaults.

use anyhow::{Context, Result};
use log::{info, warn};

use crate::device_config::{DeviceConfig, CONFIG_FIELDS};

/// Namespace grouping the persisted configuration keys.
pub const CONFIG_NAMESPACE: &str = "iot_config";

/// Key whose absence is the sentinel for "no prior save exists".
const SENTINEL_KEY: &str = "server";

/// Namespaced string key-value persistence. The ESP-IDF implementation
/// opens NVS per operation (read-only for reads, read-write for writes),
/// so no storage handle outlives a single call.
pub trait ConfigKvs {
    fn get_str(&mut self, namespace: &str, key: &str) -> Result<Option<String>>;
    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<()>;
}

pub struct ConfigStore<B: ConfigKvs> {
    pub(crate) backend: B,
}

impl<B: ConfigKvs> ConfigStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Load the persisted configuration, or defaults when no prior save
    /// exists. Storage errors degrade to defaults as well; there is no
    /// user-facing error channel at boot.
    pub fn load(&mut self, namespace: &str) -> DeviceConfig {
        let mut config = DeviceConfig::default();

        match self.backend.get_str(namespace, SENTINEL_KEY) {
            Ok(Some(server)) if !server.is_empty() => {
                config.set(SENTINEL_KEY, &server);
            }
            Ok(_) => {
                info!("no saved configuration, using defaults");
                return config;
            }
            Err(e) => {
                warn!("configuration store unreadable ({:#}), using defaults", e);
                return config;
            }
        }

        for field in CONFIG_FIELDS.iter().filter(|f| f.key != SENTINEL_KEY) {
            match self.backend.get_str(namespace, field.key) {
                Ok(Some(value)) => {
                    config.set(field.key, &value);
                }
                Ok(None) => {}
                Err(e) => warn!("failed to read '{}': {:#}", field.key, e),
            }
        }

        config.sanitize();
        info!("configuration loaded from '{}'", namespace);
        config
    }

    /// Persist all eight fields. Every field is durable before this
    /// returns; a backend write error propagates to the caller.
    pub fn save(&mut self, namespace: &str, config: &DeviceConfig) -> Result<()> {
        for field in &CONFIG_FIELDS {
            let value = config.get(field.key).unwrap_or_default();
            self.backend
                .set_str(namespace, field.key, value)
                .with_context(|| format!("failed to persist '{}'", field.key))?;
        }
        info!("configuration saved to '{}'", namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryKvs {
        entries: HashMap<(String, String), String>,
        fail_reads: bool,
    }

    impl ConfigKvs for MemoryKvs {
        fn get_str(&mut self, namespace: &str, key: &str) -> Result<Option<String>> {
            if self.fail_reads {
                return Err(anyhow!("storage corrupt"));
            }
            Ok(self
                .entries
                .get(&(namespace.to_string(), key.to_string()))
                .cloned())
        }

        fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<()> {
            self.entries
                .insert((namespace.to_string(), key.to_string()), value.to_string());
            Ok(())
        }
    }

    #[test]
    fn load_without_prior_save_returns_defaults() {
        let mut store = ConfigStore::new(MemoryKvs::default());
        assert_eq!(store.load(CONFIG_NAMESPACE), DeviceConfig::default());
    }

    #[test]
    fn load_from_corrupt_storage_returns_defaults() {
        let mut store = ConfigStore::new(MemoryKvs { fail_reads: true, ..Default::default() });
        assert_eq!(store.load(CONFIG_NAMESPACE), DeviceConfig::default());
    }

    #[test]
    fn save_then_load_round_trips_every_field() {
        let mut store = ConfigStore::new(MemoryKvs::default());
        let mut config = DeviceConfig::default();
        config.set("server", "broker.example.net");
        config.set("port", "8883");
        config.set("user", "switch");
        config.set("password", "hunter2");
        config.set("topic", "home/power");
        config.set("button_pin", "4");
        config.set("led_pin", "2");
        config.set("power_pin", "27");

        store.save(CONFIG_NAMESPACE, &config).unwrap();
        assert_eq!(store.load(CONFIG_NAMESPACE), config);
    }

    #[test]
    fn missing_server_makes_other_keys_irrelevant() {
        let mut backend = MemoryKvs::default();
        backend
            .set_str(CONFIG_NAMESPACE, "topic", "stale/topic")
            .unwrap();
        let mut store = ConfigStore::new(backend);
        // No sentinel key -> stale leftovers are ignored wholesale.
        assert_eq!(store.load(CONFIG_NAMESPACE), DeviceConfig::default());
    }

    #[test]
    fn saved_fields_survive_in_a_different_namespace_only_if_saved_there() {
        let mut store = ConfigStore::new(MemoryKvs::default());
        let mut config = DeviceConfig::default();
        config.set("server", "a.example");
        store.save("ns_a", &config).unwrap();

        assert_eq!(store.load("ns_a").server, "a.example");
        assert_eq!(store.load("ns_b"), DeviceConfig::default());
    }

    #[test]
    fn oversized_stored_values_are_clamped_on_load() {
        let mut backend = MemoryKvs::default();
        backend
            .set_str(CONFIG_NAMESPACE, "server", &"h".repeat(80))
            .unwrap();
        let mut store = ConfigStore::new(backend);
        let config = store.load(CONFIG_NAMESPACE);
        assert_eq!(config.server.len(), crate::device_config::MAX_SERVER_LEN);
    }
}
