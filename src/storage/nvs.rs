//! NVS adapter for the key-value backend (ESP32 only).
//!
//! Wraps `EspNvs` in the [`KvStorage`] capability so the same
//! [`super::KvBackend`] drives flash-resident storage on device and
//! [`super::MemoryKv`] on the host.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;

use super::kv::KvStorage;
use super::StorageError;
use crate::creds::CIPHERTEXT_FIELD_LEN;
use crate::creds::MAX_SSID_LEN;

fn map_err(e: EspError) -> StorageError {
    StorageError::Backend(format!("NVS: {:?}", e))
}

/// [`KvStorage`] over an ESP-IDF NVS namespace.
pub struct EspNvsKv {
    nvs: EspNvs<NvsDefault>,
}

impl EspNvsKv {
    /// Open (creating if needed) the given NVS namespace on the default
    /// partition.
    pub fn new(namespace: &str) -> Result<Self, StorageError> {
        let partition = EspNvsPartition::<NvsDefault>::take().map_err(map_err)?;
        let nvs = EspNvs::new(partition, namespace, true).map_err(map_err)?;
        Ok(Self { nvs })
    }
}

impl KvStorage for EspNvsKv {
    fn get_u8(&self, key: &str) -> Result<Option<u8>, StorageError> {
        self.nvs.get_u8(key).map_err(map_err)
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<(), StorageError> {
        self.nvs.set_u8(key, value).map_err(map_err)
    }

    fn get_u16(&self, key: &str) -> Result<Option<u16>, StorageError> {
        self.nvs.get_u16(key).map_err(map_err)
    }

    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), StorageError> {
        self.nvs.set_u16(key, value).map_err(map_err)
    }

    fn get_u32(&self, key: &str) -> Result<Option<u32>, StorageError> {
        self.nvs.get_u32(key).map_err(map_err)
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError> {
        self.nvs.set_u32(key, value).map_err(map_err)
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut buf = [0u8; MAX_SSID_LEN + 1];
        let value = self.nvs.get_str(key, &mut buf).map_err(map_err)?;
        Ok(value.map(|s| s.to_string()))
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.nvs.set_str(key, value).map_err(map_err)
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut buf = [0u8; CIPHERTEXT_FIELD_LEN + 4];
        let value = self.nvs.get_raw(key, &mut buf).map_err(map_err)?;
        Ok(value.map(|b| b.to_vec()))
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.nvs.set_raw(key, value).map_err(map_err)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.nvs.remove(key).map_err(map_err)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        // EspNvs commits on every set; nothing further to flush.
        Ok(())
    }
}
