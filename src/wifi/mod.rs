//! Connectivity service and its capabilities.
//!
//! # Components
//!
//! - [`radio`] - radio capability trait and scan/link types
//! - [`platform`] - watchdog, delay and mDNS primitives
//! - [`station`] - legacy single-network station configuration
//! - [`service`] - scan/select/connect/fallback orchestration
//! - `esp` - ESP-IDF implementations of the capabilities (ESP32 only)

mod platform;
mod radio;
mod service;
mod station;

#[cfg(feature = "esp32")]
mod esp;

pub use platform::{DelayProvider, Mdns, MdnsError, NoopWatchdog, StdDelay, Watchdog};
pub use radio::{LinkStatus, RadioControl, RadioError, RadioMode, ScanResult, ScanState};
pub use service::{
    ConnectOutcome, ConnectParams, ConnectionPhase, ConnectivityService, FallbackReason,
    ScanOutcome, WifiStartOutcome, AP_ADDRESS, AP_SUBNET,
};
pub use station::{
    StationConfig, StationError, StationStore, MAX_PASSPHRASE_LEN, MIN_PASSPHRASE_LEN,
};

#[cfg(feature = "esp32")]
pub use esp::{EspDelay, EspMdnsResponder, EspRadio, EspTaskWatchdog};
