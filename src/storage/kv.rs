//! Key-value persistence backend.
//!
//! Mirrors the flat-file layout onto a typed key-value namespace (the NVS
//! surface on ESP32): one `count` key, then per index `i` the keys
//! `name{i}` (string), `secret{i}` (blob), `len{i}` (u16) and
//! `gateway{i}`/`subnet{i}`/`address{i}` (u32).
//!
//! [`MemoryKv`] is the host implementation, used by tests and development
//! builds; the ESP32 NVS adapter lives in [`super::nvs`] behind the
//! `esp32` feature.

use log::{debug, warn};
use std::collections::HashMap;

use super::codec::{ip_to_raw, raw_to_ip};
use super::{StorageBackend, StorageError};
use crate::creds::{
    ciphertext_len_is_valid, CredentialRecord, StaticIpConfig, MAX_CREDENTIALS,
};

/// Typed key-value storage capability (get/set/commit by key).
///
/// Absent keys read as `Ok(None)`. Implementations may defer durability
/// until [`commit`](KvStorage::commit).
pub trait KvStorage {
    fn get_u8(&self, key: &str) -> Result<Option<u8>, StorageError>;
    fn set_u8(&mut self, key: &str, value: u8) -> Result<(), StorageError>;
    fn get_u16(&self, key: &str) -> Result<Option<u16>, StorageError>;
    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), StorageError>;
    fn get_u32(&self, key: &str) -> Result<Option<u32>, StorageError>;
    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError>;
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// A typed value in the in-memory key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Str(String),
    Blob(Vec<u8>),
}

/// In-memory [`KvStorage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: HashMap<String, KvValue>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry access, for inspection in tests.
    pub fn entry(&self, key: &str) -> Option<&KvValue> {
        self.entries.get(key)
    }

    /// Insert a raw entry directly, bypassing the typed setters.
    pub fn insert(&mut self, key: impl Into<String>, value: KvValue) {
        self.entries.insert(key.into(), value);
    }
}

impl KvStorage for MemoryKv {
    fn get_u8(&self, key: &str) -> Result<Option<u8>, StorageError> {
        Ok(match self.entries.get(key) {
            Some(KvValue::U8(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), KvValue::U8(value));
        Ok(())
    }

    fn get_u16(&self, key: &str) -> Result<Option<u16>, StorageError> {
        Ok(match self.entries.get(key) {
            Some(KvValue::U16(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), KvValue::U16(value));
        Ok(())
    }

    fn get_u32(&self, key: &str) -> Result<Option<u32>, StorageError> {
        Ok(match self.entries.get(key) {
            Some(KvValue::U32(v)) => Some(*v),
            _ => None,
        })
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), KvValue::U32(value));
        Ok(())
    }

    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(match self.entries.get(key) {
            Some(KvValue::Str(v)) => Some(v.clone()),
            _ => None,
        })
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .insert(key.to_string(), KvValue::Str(value.to_string()));
        Ok(())
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(match self.entries.get(key) {
            Some(KvValue::Blob(v)) => Some(v.clone()),
            _ => None,
        })
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .insert(key.to_string(), KvValue::Blob(value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

const COUNT_KEY: &str = "count";

/// Credential store backend over a [`KvStorage`] namespace.
pub struct KvBackend {
    kv: Box<dyn KvStorage>,
}

impl KvBackend {
    /// Create a backend over the given key-value store. The store should
    /// be scoped to a namespace dedicated to credentials.
    pub fn new(kv: Box<dyn KvStorage>) -> Self {
        Self { kv }
    }

    fn load_record(&self, index: usize) -> Result<Option<CredentialRecord>, StorageError> {
        let Some(ssid) = self.kv.get_str(&format!("name{}", index))? else {
            return Ok(None);
        };
        if ssid.is_empty() {
            return Ok(None);
        }
        let Some(blob) = self.kv.get_blob(&format!("secret{}", index))? else {
            return Ok(None);
        };
        let Some(len) = self.kv.get_u16(&format!("len{}", index))? else {
            return Ok(None);
        };
        let len = len as usize;
        if !ciphertext_len_is_valid(len) || blob.len() < len {
            return Ok(None);
        }
        let Some(gateway) = self.kv.get_u32(&format!("gateway{}", index))? else {
            return Ok(None);
        };
        let Some(subnet) = self.kv.get_u32(&format!("subnet{}", index))? else {
            return Ok(None);
        };
        let Some(address) = self.kv.get_u32(&format!("address{}", index))? else {
            return Ok(None);
        };

        Ok(Some(CredentialRecord::from_parts(
            ssid,
            blob[..len].to_vec(),
            StaticIpConfig::new(raw_to_ip(address), raw_to_ip(gateway), raw_to_ip(subnet)),
        )))
    }
}

impl StorageBackend for KvBackend {
    fn save(&mut self, records: &[CredentialRecord]) -> Result<(), StorageError> {
        let count = records.len().min(MAX_CREDENTIALS);
        self.kv.set_u8(COUNT_KEY, count as u8)?;
        for (i, record) in records.iter().take(MAX_CREDENTIALS).enumerate() {
            let ip = record.ip_config();
            self.kv.set_str(&format!("name{}", i), record.ssid())?;
            self.kv.set_blob(&format!("secret{}", i), record.ciphertext())?;
            self.kv
                .set_u16(&format!("len{}", i), record.ciphertext().len() as u16)?;
            self.kv.set_u32(&format!("gateway{}", i), ip_to_raw(ip.gateway))?;
            self.kv.set_u32(&format!("subnet{}", i), ip_to_raw(ip.subnet))?;
            self.kv.set_u32(&format!("address{}", i), ip_to_raw(ip.address))?;
        }
        self.kv.commit()?;
        debug!("saved {} credential(s) to key-value store", count);
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<CredentialRecord>, StorageError> {
        let Some(count) = self.kv.get_u8(COUNT_KEY)? else {
            debug!("no credential count in key-value store");
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for i in 0..count as usize {
            if records.len() == MAX_CREDENTIALS {
                warn!(
                    "key-value store holds more than {} records; truncating",
                    MAX_CREDENTIALS
                );
                break;
            }
            match self.load_record(i)? {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        "incomplete credential record at index {}; keeping {} loaded",
                        i,
                        records.len()
                    );
                    if records.is_empty() {
                        return Err(StorageError::Corrupted("no complete record"));
                    }
                    break;
                }
            }
        }

        Ok(records)
    }
}
