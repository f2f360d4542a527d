//! Encrypted Wi-Fi credential vault and connectivity manager for
//! ESP32-class devices.
//!
//! A headless device has to join a wireless network without a screen or
//! keyboard, survive power loss, and resist casual extraction of secrets
//! from its flash. This crate pairs an encrypted multi-network credential
//! store with the connection-selection logic that consumes it:
//!
//! - [`creds`] - AES-256-CBC encrypted credential store with a
//!   hardware-backed (or observably insecure) key source
//! - [`storage`] - interchangeable flat-file and key-value persistence
//!   backends
//! - [`wifi`] - scan, rank by signal strength, connect within a bounded
//!   time, or fall back to self-hosted access-point provisioning
//!
//! The core is platform-independent and tested on the host; ESP-IDF
//! bindings live behind the `esp32` feature.

pub mod creds;
pub mod storage;
pub mod wifi;

// Re-export commonly used items
pub use creds::{
    CredentialError, CredentialManager, CredentialRecord, InsecureKeySource, KeySource,
    StaticIpConfig, MAX_CREDENTIALS,
};
pub use storage::{FileBackend, KvBackend, MemoryKv, StorageBackend, StorageError};
pub use wifi::{
    ConnectOutcome, ConnectParams, ConnectionPhase, ConnectivityService, FallbackReason,
    RadioControl, ScanOutcome, ScanResult, WifiStartOutcome,
};
