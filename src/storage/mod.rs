//! Persistence backends for the credential store.
//!
//! The store serializes through a single [`StorageBackend`] interface with
//! two interchangeable implementations, chosen once at construction:
//!
//! - [`FileBackend`] - flat binary file
//! - [`KvBackend`] - typed key-value store (NVS-style)
//!
//! Both share the same durability rules: writes are all-or-nothing, and
//! loading stops at the first incomplete record while keeping the valid
//! records read before it.

mod codec;
mod file;
mod kv;

#[cfg(feature = "esp32")]
mod nvs;

pub use file::FileBackend;
pub use kv::{KvBackend, KvStorage, KvValue, MemoryKv};

#[cfg(feature = "esp32")]
pub use nvs::EspNvsKv;

use std::fmt;
use std::io;

use crate::creds::CredentialRecord;

/// Storage backend abstraction for the credential store.
pub trait StorageBackend {
    /// Persist the whole store. All-or-nothing: a failed write must not
    /// leave a readable half-written store behind.
    fn save(&mut self, records: &[CredentialRecord]) -> Result<(), StorageError>;

    /// Load the whole store. An absent store loads as empty. A store that
    /// ends mid-record yields the records read before the damage; if a
    /// nonzero record count yields not even one complete record, this is
    /// [`StorageError::Corrupted`].
    fn load(&mut self) -> Result<Vec<CredentialRecord>, StorageError>;
}

/// Errors from persistence operations.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying I/O failure.
    Io(io::Error),
    /// Backend-specific failure (driver error, verification mismatch).
    Backend(String),
    /// Stored data is present but unusable.
    Corrupted(&'static str),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Backend(msg) => write!(f, "backend error: {}", msg),
            Self::Corrupted(msg) => write!(f, "corrupted store: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
