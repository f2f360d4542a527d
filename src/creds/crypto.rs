//! AES-256-CBC secret encryption.
//!
//! Secrets are encrypted with AES-256 in CBC mode using PKCS#7 padding and
//! a fixed all-zero IV. Plaintext is limited to 63 bytes so the padded
//! ciphertext always fits the fixed 64-byte field of the persisted layout.
//!
//! Unpadding is strict: the total length must be a nonzero multiple of the
//! block size, the declared pad value must lie in `[1, 16]`, and every
//! trailing pad byte must equal it. Any violation is a decryption failure;
//! no truncated or garbage plaintext is ever surfaced.
//!
//! # Known weakness
//!
//! The fixed IV means two identical secrets encrypt to identical
//! ciphertext. The persisted layout of already-provisioned devices stores
//! bare ciphertext with no room for a per-record IV, so this is kept for
//! compatibility rather than silently patched.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::record::{ciphertext_len_is_valid, AES_BLOCK_LEN, CIPHERTEXT_FIELD_LEN, MAX_SECRET_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Development fallback key used when no hardware-programmed key is
/// available. Provides obfuscation only; callers can query
/// [`KeyContext::is_hardware_backed`] to tell the difference.
pub(crate) const FALLBACK_KEY: [u8; KEY_LEN] = [
    0x4e, 0x1f, 0x8a, 0x2d, 0x90, 0x5b, 0xc7, 0x33, 0x61, 0xe4, 0x0c, 0xaf, 0x72, 0x18, 0xd5, 0x9e,
    0x26, 0xb3, 0x7f, 0x48, 0xfa, 0x05, 0x6c, 0xd1, 0x3a, 0x87, 0x50, 0xee, 0x19, 0xc2, 0x64, 0xbd,
];

const ZERO_IV: [u8; AES_BLOCK_LEN] = [0u8; AES_BLOCK_LEN];

/// A 256-bit key plus its provenance. Established once when the manager
/// starts; never persisted. Key bytes are zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyContext {
    key: [u8; KEY_LEN],
    #[zeroize(skip)]
    hardware_backed: bool,
}

impl KeyContext {
    /// Create a key context from raw key bytes.
    pub fn new(key: [u8; KEY_LEN], hardware_backed: bool) -> Self {
        Self {
            key,
            hardware_backed,
        }
    }

    /// The insecure fallback context (fixed key).
    pub fn fallback() -> Self {
        Self::new(FALLBACK_KEY, false)
    }

    /// Whether the key came from a hardware-protected region.
    pub fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }

    pub(crate) fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

/// Errors from secret encryption and decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Plaintext secret is empty.
    EmptySecret,
    /// Plaintext secret exceeds [`MAX_SECRET_LEN`].
    SecretTooLong { len: usize, max: usize },
    /// Ciphertext length is zero, not block-aligned, or over the field width.
    InvalidCiphertextLength { len: usize },
    /// PKCS#7 padding validation failed.
    InvalidPadding,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySecret => write!(f, "secret cannot be empty"),
            Self::SecretTooLong { len, max } => {
                write!(f, "secret too long: {} bytes (max {})", len, max)
            }
            Self::InvalidCiphertextLength { len } => {
                write!(f, "invalid ciphertext length: {} bytes", len)
            }
            Self::InvalidPadding => write!(f, "padding validation failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Encrypt a plaintext secret of 1..=63 bytes.
///
/// Returns the ciphertext, whose length is the plaintext length rounded up
/// to the next block boundary (always 16..=64 bytes).
pub fn encrypt_secret(key: &KeyContext, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptySecret);
    }
    if plaintext.len() > MAX_SECRET_LEN {
        return Err(CryptoError::SecretTooLong {
            len: plaintext.len(),
            max: MAX_SECRET_LEN,
        });
    }

    let mut buf = [0u8; CIPHERTEXT_FIELD_LEN];
    let result = Aes256CbcEnc::new(key.key().into(), (&ZERO_IV).into())
        .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut buf);
    let out = match result {
        Ok(ct) => Ok(ct.to_vec()),
        // Unreachable for valid input sizes; the 64-byte buffer holds any
        // padded plaintext of up to 63 bytes.
        Err(_) => Err(CryptoError::InvalidCiphertextLength {
            len: plaintext.len(),
        }),
    };
    buf.zeroize();
    out
}

/// Decrypt a stored secret.
///
/// The plaintext passes through a transient buffer that is zeroed before
/// returning, in every path. Returns [`CryptoError::InvalidPadding`] for
/// any padding violation.
pub fn decrypt_secret(key: &KeyContext, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if !ciphertext_len_is_valid(ciphertext.len()) {
        return Err(CryptoError::InvalidCiphertextLength {
            len: ciphertext.len(),
        });
    }

    let mut buf = [0u8; CIPHERTEXT_FIELD_LEN];
    let result = Aes256CbcDec::new(key.key().into(), (&ZERO_IV).into())
        .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, &mut buf);
    let out = match result {
        Ok(plaintext) => Ok(Zeroizing::new(plaintext.to_vec())),
        Err(_) => Err(CryptoError::InvalidPadding),
    };
    buf.zeroize();
    out
}
