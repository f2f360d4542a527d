//! Credential manager.
//!
//! Sole owner of the in-memory credential store and the key context. This
//! is the only component that ever sees plaintext secrets, and only
//! transiently: decryption goes through zeroed temporary buffers, and
//! removed records are scrubbed before their slots are erased.
//!
//! Mutations are in-memory until [`CredentialManager::persist`] is called,
//! with one exception: [`CredentialManager::clear_all`] persists the empty
//! store immediately so a deleted secret cannot be resurrected by a stale
//! file after reboot.

use log::{error, info, warn};
use zeroize::Zeroizing;

use super::crypto::{self, CryptoError, KeyContext};
use super::keysource::KeySource;
use super::record::{CredentialRecord, StaticIpConfig, MAX_CREDENTIALS, MAX_SSID_LEN};
use crate::storage::{StorageBackend, StorageError};

/// Errors from credential store operations.
#[derive(Debug)]
pub enum CredentialError {
    /// Network name is empty.
    EmptyName,
    /// Network name exceeds [`MAX_SSID_LEN`].
    NameTooLong { len: usize, max: usize },
    /// A record with this name already exists.
    DuplicateName,
    /// The store already holds [`MAX_CREDENTIALS`] records.
    StoreFull,
    /// No record matches the given name.
    NoSuchRecord,
    /// Index is outside the store.
    IndexOutOfRange { index: usize, len: usize },
    /// Secret encryption or decryption failed.
    Crypto(CryptoError),
    /// Persistence failed.
    Storage(StorageError),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "network name cannot be empty"),
            Self::NameTooLong { len, max } => {
                write!(f, "network name too long: {} bytes (max {})", len, max)
            }
            Self::DuplicateName => write!(f, "a record with this name already exists"),
            Self::StoreFull => write!(f, "credential store is full"),
            Self::NoSuchRecord => write!(f, "no record matches this name"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {} out of range (store holds {})", index, len)
            }
            Self::Crypto(e) => write!(f, "crypto error: {}", e),
            Self::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CryptoError> for CredentialError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<StorageError> for CredentialError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Owner of the credential store and key context.
pub struct CredentialManager {
    records: Vec<CredentialRecord>,
    key: KeyContext,
    backend: Box<dyn StorageBackend>,
}

impl CredentialManager {
    /// Create a manager over the given persistence backend.
    ///
    /// The key context starts as the insecure fallback; call
    /// [`begin`](Self::begin) to source the real key.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            records: Vec::new(),
            key: KeyContext::fallback(),
            backend,
        }
    }

    /// Source the encryption key.
    ///
    /// Never fails: if the source reports an unprogrammed region or an
    /// error, the fixed fallback key is used and the context is marked
    /// insecure. Query [`is_hardware_backed`](Self::is_hardware_backed)
    /// for diagnostics.
    pub fn begin(&mut self, source: &mut dyn KeySource) {
        match source.load_key() {
            Ok(material) => {
                info!(
                    "credential key loaded (hardware-backed: {})",
                    material.hardware_backed
                );
                self.key = KeyContext::new(material.key, material.hardware_backed);
            }
            Err(e) => {
                warn!("key source failed ({}); using insecure fallback key", e);
                self.key = KeyContext::fallback();
            }
        }
    }

    /// Whether the active key came from a hardware-protected region.
    pub fn is_hardware_backed(&self) -> bool {
        self.key.is_hardware_backed()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The stored records (encrypted secrets only).
    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    /// Index of the record with the given name.
    pub fn position(&self, ssid: &str) -> Option<usize> {
        self.records.iter().position(|r| r.ssid() == ssid)
    }

    fn validate_name(&self, ssid: &str) -> Result<(), CredentialError> {
        if ssid.is_empty() {
            error!("rejecting credential with empty name");
            return Err(CredentialError::EmptyName);
        }
        if ssid.len() > MAX_SSID_LEN {
            error!("rejecting credential with over-long name ({} bytes)", ssid.len());
            return Err(CredentialError::NameTooLong {
                len: ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        Ok(())
    }

    /// Add a credential. The secret is encrypted before the record is
    /// appended; nothing is persisted until [`persist`](Self::persist).
    pub fn add_credential(
        &mut self,
        ssid: &str,
        secret: &str,
        ip: StaticIpConfig,
    ) -> Result<(), CredentialError> {
        self.validate_name(ssid)?;
        if self.position(ssid).is_some() {
            error!("rejecting duplicate credential for {}", ssid);
            return Err(CredentialError::DuplicateName);
        }
        if self.records.len() >= MAX_CREDENTIALS {
            error!("credential store is full ({} records)", MAX_CREDENTIALS);
            return Err(CredentialError::StoreFull);
        }

        let cipher = crypto::encrypt_secret(&self.key, secret.as_bytes()).map_err(|e| {
            error!("failed to encrypt secret for {}: {}", ssid, e);
            e
        })?;
        self.records
            .push(CredentialRecord::from_parts(ssid.to_string(), cipher, ip));
        info!("stored credential for {}", ssid);
        Ok(())
    }

    /// Re-encrypt an existing record's secret and replace its address
    /// configuration. The store size is unchanged.
    pub fn update_credential(
        &mut self,
        ssid: &str,
        secret: &str,
        ip: StaticIpConfig,
    ) -> Result<(), CredentialError> {
        let index = self.position(ssid).ok_or_else(|| {
            error!("cannot update unknown credential {}", ssid);
            CredentialError::NoSuchRecord
        })?;
        let cipher = crypto::encrypt_secret(&self.key, secret.as_bytes()).map_err(|e| {
            error!("failed to re-encrypt secret for {}: {}", ssid, e);
            e
        })?;
        let record = &mut self.records[index];
        record.set_cipher(cipher);
        record.set_ip_config(ip);
        info!("updated credential for {}", ssid);
        Ok(())
    }

    /// Remove the record at `index`, scrubbing its sensitive fields first.
    pub fn remove_by_index(&mut self, index: usize) -> Result<(), CredentialError> {
        if index >= self.records.len() {
            error!("remove index {} out of range", index);
            return Err(CredentialError::IndexOutOfRange {
                index,
                len: self.records.len(),
            });
        }
        self.records[index].scrub();
        self.records.remove(index);
        info!("removed credential at index {}", index);
        Ok(())
    }

    /// Remove the record with the given name, scrubbing it first.
    pub fn remove_by_name(&mut self, ssid: &str) -> Result<(), CredentialError> {
        let index = self.position(ssid).ok_or(CredentialError::NoSuchRecord)?;
        self.remove_by_index(index)
    }

    /// Decrypt the secret at `index`.
    ///
    /// Returns `None` on a bad index or any decryption failure; corrupt or
    /// partially-decrypted data is never surfaced. The transient plaintext
    /// buffer is zeroed in every path.
    pub fn password(&self, index: usize) -> Option<Zeroizing<String>> {
        let record = self.records.get(index)?;
        let plaintext = match crypto::decrypt_secret(&self.key, record.ciphertext()) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!("failed to decrypt secret for {}: {}", record.ssid(), e);
                return None;
            }
        };
        match std::str::from_utf8(&plaintext) {
            Ok(s) => Some(Zeroizing::new(s.to_string())),
            Err(_) => {
                error!("decrypted secret for {} is not valid UTF-8", record.ssid());
                None
            }
        }
    }

    /// Decrypt the secret of the record with the given name.
    pub fn password_for(&self, ssid: &str) -> Option<Zeroizing<String>> {
        self.password(self.position(ssid)?)
    }

    /// Attach a static address configuration to a record.
    pub fn set_ip_config(&mut self, ssid: &str, ip: StaticIpConfig) -> Result<(), CredentialError> {
        let index = self.position(ssid).ok_or(CredentialError::NoSuchRecord)?;
        self.records[index].set_ip_config(ip);
        Ok(())
    }

    /// Read a record's static address configuration.
    pub fn ip_config(&self, ssid: &str) -> Option<StaticIpConfig> {
        Some(self.records[self.position(ssid)?].ip_config())
    }

    /// Persist the whole store through the backend.
    pub fn persist(&mut self) -> Result<(), CredentialError> {
        self.backend.save(&self.records).map_err(|e| {
            error!("failed to persist credential store: {}", e);
            CredentialError::from(e)
        })
    }

    /// Replace the in-memory store with the persisted one.
    ///
    /// Previous in-memory records are scrubbed. Returns the number of
    /// records loaded.
    pub fn load(&mut self) -> Result<usize, CredentialError> {
        let loaded = self.backend.load().map_err(|e| {
            error!("failed to load credential store: {}", e);
            CredentialError::from(e)
        })?;
        for record in &mut self.records {
            record.scrub();
        }
        self.records = loaded;
        info!("loaded {} credential(s)", self.records.len());
        Ok(self.records.len())
    }

    /// Scrub every record, empty the store, and persist immediately.
    pub fn clear_all(&mut self) -> Result<(), CredentialError> {
        for record in &mut self.records {
            record.scrub();
        }
        self.records.clear();
        self.persist()?;
        info!("credential store cleared");
        Ok(())
    }
}
