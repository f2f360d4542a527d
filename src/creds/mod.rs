//! Encrypted credential store.
//!
//! This module owns everything that touches secrets:
//!
//! - [`record`] - the stored credential model (name, ciphertext, static
//!   address configuration)
//! - [`crypto`] - AES-256-CBC encryption with strict PKCS#7 validation
//! - [`keysource`] - key retrieval with an observable insecure fallback
//! - [`manager`] - the store owner; the only component that sees plaintext
//!
//! Persistence goes through the backends in [`crate::storage`].

mod crypto;
mod keysource;
mod manager;
mod record;

#[cfg(feature = "esp32")]
mod efuse;

pub use crypto::{decrypt_secret, encrypt_secret, CryptoError, KeyContext, KEY_LEN};
pub use keysource::{InsecureKeySource, KeyMaterial, KeySource, KeySourceError};
pub use manager::{CredentialError, CredentialManager};
pub use record::{
    CredentialRecord, StaticIpConfig, AES_BLOCK_LEN, CIPHERTEXT_FIELD_LEN, MAX_CREDENTIALS,
    MAX_SECRET_LEN, MAX_SSID_LEN,
};

#[cfg(feature = "esp32")]
pub use efuse::EfuseKeySource;

pub(crate) use record::ciphertext_len_is_valid;

#[cfg(test)]
pub(crate) use crypto::FALLBACK_KEY;
