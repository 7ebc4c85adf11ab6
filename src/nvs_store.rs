// NVS Config Backend
// Namespaced string persistence over ESP-IDF NVS. Handles are opened per
// operation (read-only for reads, read-write for writes) and dropped before
// returning, so nothing stays open across the boot sequence.

use anyhow::{Context, Result};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use log::info;

use crate::config_store::ConfigKvs;

// Longest persisted value is a 39-char field; round up generously.
const READ_BUF_LEN: usize = 128;

pub struct NvsConfigKvs {
    partition: EspDefaultNvsPartition,
}

impl NvsConfigKvs {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        info!("configuration persistence bound to the default NVS partition");
        Self { partition }
    }
}

impl ConfigKvs for NvsConfigKvs {
    fn get_str(&mut self, namespace: &str, key: &str) -> Result<Option<String>> {
        let mut nvs = EspNvs::new(self.partition.clone(), namespace, false)
            .with_context(|| format!("failed to open NVS namespace '{}'", namespace))?;
        let mut buf = [0u8; READ_BUF_LEN];
        let value = nvs
            .get_str(key, &mut buf)
            .with_context(|| format!("failed to read NVS key '{}'", key))?;
        Ok(value.map(str::to_string))
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut nvs = EspNvs::new(self.partition.clone(), namespace, true)
            .with_context(|| format!("failed to open NVS namespace '{}'", namespace))?;
        nvs.set_str(key, value)
            .with_context(|| format!("failed to write NVS key '{}'", key))?;
        Ok(())
    }
}
