//! Legacy single-network station configuration.
//!
//! Before the multi-network credential store existed, devices remembered
//! exactly one network. That path survives as a fallback: the boot
//! sequence tries it when the credential store yields nothing usable, and
//! the provisioning form can still persist to it. The passphrase is stored
//! in the clear here; the encrypted store is the preferred home for
//! secrets.

use log::{debug, warn};
use std::fmt;

use crate::storage::{KvStorage, StorageError};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Minimum passphrase length for WPA2.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Key-value key for the stored station configuration.
const STATION_KEY: &str = "station";

/// Credentials for a single station network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network passphrase (8-64 bytes for WPA2, empty for open networks).
    pub passphrase: String,
}

impl StationConfig {
    /// Create a validated station configuration.
    pub fn new(
        ssid: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, StationError> {
        let config = Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for an open network (no passphrase).
    pub fn open(ssid: impl Into<String>) -> Result<Self, StationError> {
        Self::new(ssid, String::new())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), StationError> {
        if self.ssid.is_empty() {
            return Err(StationError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(StationError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        if !self.passphrase.is_empty() && self.passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(StationError::PassphraseTooShort {
                len: self.passphrase.len(),
                min: MIN_PASSPHRASE_LEN,
            });
        }
        if self.passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(StationError::PassphraseTooLong {
                len: self.passphrase.len(),
                max: MAX_PASSPHRASE_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no passphrase).
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// Serialize for key-value storage.
    ///
    /// Format: `[ssid_len:1][ssid:N][passphrase_len:1][passphrase:M]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.ssid.len() + self.passphrase.len());
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.passphrase.len() as u8);
        bytes.extend_from_slice(self.passphrase.as_bytes());
        bytes
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StationError> {
        if bytes.is_empty() {
            return Err(StationError::InvalidFormat("empty data"));
        }

        let ssid_len = bytes[0] as usize;
        if bytes.len() < 1 + ssid_len + 1 {
            return Err(StationError::InvalidFormat("truncated SSID"));
        }

        let ssid = std::str::from_utf8(&bytes[1..1 + ssid_len])
            .map_err(|_| StationError::InvalidFormat("invalid SSID UTF-8"))?;

        let passphrase_len = bytes[1 + ssid_len] as usize;
        let passphrase_start = 2 + ssid_len;
        if bytes.len() < passphrase_start + passphrase_len {
            return Err(StationError::InvalidFormat("truncated passphrase"));
        }

        let passphrase =
            std::str::from_utf8(&bytes[passphrase_start..passphrase_start + passphrase_len])
                .map_err(|_| StationError::InvalidFormat("invalid passphrase UTF-8"))?;

        Self::new(ssid, passphrase)
    }
}

/// Errors from station configuration handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase is too short for WPA2.
    PassphraseTooShort { len: usize, min: usize },
    /// Passphrase exceeds maximum length.
    PassphraseTooLong { len: usize, max: usize },
    /// Invalid data format during deserialization.
    InvalidFormat(&'static str),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PassphraseTooShort { len, min } => {
                write!(f, "passphrase too short: {} bytes (min {})", len, min)
            }
            Self::PassphraseTooLong { len, max } => {
                write!(f, "passphrase too long: {} bytes (max {})", len, max)
            }
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Persists one [`StationConfig`] through a key-value store.
pub struct StationStore {
    kv: Box<dyn KvStorage>,
}

impl StationStore {
    /// Create a store over the given key-value namespace.
    pub fn new(kv: Box<dyn KvStorage>) -> Self {
        Self { kv }
    }

    /// Load the stored configuration.
    ///
    /// Returns `None` if nothing is stored or the data is corrupted.
    pub fn load(&self) -> Option<StationConfig> {
        let bytes = match self.kv.get_blob(STATION_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("no legacy station configuration stored");
                return None;
            }
            Err(e) => {
                warn!("failed to read legacy station configuration: {}", e);
                return None;
            }
        };
        match StationConfig::from_bytes(&bytes) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("stored station configuration is invalid: {}", e);
                None
            }
        }
    }

    /// Persist a configuration.
    pub fn save(&mut self, config: &StationConfig) -> Result<(), StorageError> {
        self.kv.set_blob(STATION_KEY, &config.to_bytes())?;
        self.kv.commit()
    }

    /// Remove the stored configuration.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.kv.remove(STATION_KEY)?;
        self.kv.commit()
    }
}
