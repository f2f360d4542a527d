//! Credential record model.
//!
//! A record pairs a network name with its encrypted secret and an optional
//! static address configuration. Records are the unit of storage for the
//! credential store; plaintext secrets never appear in a record.

use std::net::Ipv4Addr;
use zeroize::Zeroize;

/// Maximum number of stored credentials.
pub const MAX_CREDENTIALS: usize = 5;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum plaintext secret length. One byte below four AES blocks so the
/// PKCS#7-padded ciphertext always fits the fixed 64-byte field.
pub const MAX_SECRET_LEN: usize = 63;

/// AES block length in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// Fixed width of the stored ciphertext field (four AES blocks).
pub const CIPHERTEXT_FIELD_LEN: usize = 64;

/// Check the stored-ciphertext length invariant: positive, block-aligned,
/// and within the fixed field.
pub(crate) fn ciphertext_len_is_valid(len: usize) -> bool {
    len > 0 && len % AES_BLOCK_LEN == 0 && len <= CIPHERTEXT_FIELD_LEN
}

/// Static address configuration for a network.
///
/// An all-zero triple means "use dynamic addressing" (DHCP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticIpConfig {
    /// Local address to assume on this network.
    pub address: Ipv4Addr,
    /// Gateway address.
    pub gateway: Ipv4Addr,
    /// Subnet mask.
    pub subnet: Ipv4Addr,
}

impl StaticIpConfig {
    /// Dynamic addressing marker (all fields zero).
    pub const DYNAMIC: Self = Self {
        address: Ipv4Addr::UNSPECIFIED,
        gateway: Ipv4Addr::UNSPECIFIED,
        subnet: Ipv4Addr::UNSPECIFIED,
    };

    /// Create a static address configuration.
    pub const fn new(address: Ipv4Addr, gateway: Ipv4Addr, subnet: Ipv4Addr) -> Self {
        Self {
            address,
            gateway,
            subnet,
        }
    }

    /// Returns true if this configuration requests a static address.
    pub fn is_static(&self) -> bool {
        *self != Self::DYNAMIC
    }
}

impl Default for StaticIpConfig {
    fn default() -> Self {
        Self::DYNAMIC
    }
}

/// A stored network credential.
///
/// The secret is held only in encrypted form; decryption is the
/// credential manager's job. Invariant: the ciphertext length is a
/// positive multiple of [`AES_BLOCK_LEN`], at most
/// [`CIPHERTEXT_FIELD_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    ssid: String,
    cipher: Vec<u8>,
    ip: StaticIpConfig,
}

impl CredentialRecord {
    pub(crate) fn from_parts(ssid: String, cipher: Vec<u8>, ip: StaticIpConfig) -> Self {
        Self { ssid, cipher, ip }
    }

    /// Network name.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Encrypted secret bytes.
    pub fn ciphertext(&self) -> &[u8] {
        &self.cipher
    }

    /// Static address configuration ([`StaticIpConfig::DYNAMIC`] if unset).
    pub fn ip_config(&self) -> StaticIpConfig {
        self.ip
    }

    pub(crate) fn set_cipher(&mut self, mut cipher: Vec<u8>) {
        std::mem::swap(&mut self.cipher, &mut cipher);
        cipher.zeroize();
    }

    pub(crate) fn set_ip_config(&mut self, ip: StaticIpConfig) {
        self.ip = ip;
    }

    /// Zero the name and ciphertext bytes. Called before a record slot is
    /// erased so secrets cannot linger in freed memory.
    pub(crate) fn scrub(&mut self) {
        self.ssid.zeroize();
        self.cipher.zeroize();
        self.ip = StaticIpConfig::DYNAMIC;
    }
}
