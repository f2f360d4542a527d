//! Key sourcing for the credential store.
//!
//! A [`KeySource`] supplies the 256-bit symmetric key that protects stored
//! secrets, together with a flag saying whether it came from a
//! hardware-protected region. The insecure fallback path is deliberately
//! observable: a device must always be able to encrypt something, but
//! callers and tests can tell which key is in use.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::crypto::{FALLBACK_KEY, KEY_LEN};

/// Key bytes plus their provenance, as produced by a [`KeySource`].
/// Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// 256-bit symmetric key.
    pub key: [u8; KEY_LEN],
    /// True if the key was read from a hardware-protected region.
    #[zeroize(skip)]
    pub hardware_backed: bool,
}

/// Capability that supplies the store's symmetric key.
pub trait KeySource {
    /// Read the key. Implementations report an erased or unreadable key
    /// region as an error so the caller can fall back explicitly.
    fn load_key(&mut self) -> Result<KeyMaterial, KeySourceError>;
}

/// Errors from key retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySourceError {
    /// The key region exists but has never been programmed.
    Unprogrammed,
    /// The key region could not be read.
    Unavailable(String),
}

impl fmt::Display for KeySourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprogrammed => write!(f, "key region is not programmed"),
            Self::Unavailable(msg) => write!(f, "key source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for KeySourceError {}

/// Key source that always yields the fixed development key.
///
/// For host builds and devices without a programmed hardware key. The
/// resulting key context reports itself as not hardware-backed.
pub struct InsecureKeySource;

impl KeySource for InsecureKeySource {
    fn load_key(&mut self) -> Result<KeyMaterial, KeySourceError> {
        Ok(KeyMaterial {
            key: FALLBACK_KEY,
            hardware_backed: false,
        })
    }
}
