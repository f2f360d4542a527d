//! Radio capability.
//!
//! The connectivity service drives the radio through this trait; scanning,
//! association and link-state reporting come from an underlying driver
//! (ESP-IDF on device, stubs in tests) and are not reimplemented here.

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::creds::StaticIpConfig;

/// One visible network from a scan.
///
/// Serializes as `{"ssid": ..., "strength": ..., "security": ...}` for the
/// provisioning HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Network name.
    pub ssid: String,
    /// Received signal strength in dBm (higher is better).
    #[serde(rename = "strength")]
    pub rssi: i32,
    /// True if the network requires authentication.
    #[serde(rename = "security")]
    pub secured: bool,
}

/// Progress of a radio scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// No scan has been started.
    Idle,
    /// A scan is running.
    InProgress,
    /// The scan failed.
    Failed,
    /// The scan completed with these results.
    Done(Vec<ScanResult>),
}

/// Link state of a station connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No connection attempt in progress.
    Idle,
    /// Association or address assignment still in progress.
    Connecting,
    /// Connected with an address assigned.
    Connected,
    /// The access point rejected the credentials.
    AuthFailed,
    /// No access point with the requested name was found.
    SsidNotFound,
    /// The attempt failed for another reason.
    Failed,
}

/// Operating mode of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Client of an access point.
    Station,
    /// Self-hosted access point.
    AccessPoint,
    /// Station and access point simultaneously (used transiently while a
    /// provisioning page tries a new network).
    Dual,
}

/// Control surface of the underlying radio driver.
pub trait RadioControl {
    /// Start a non-blocking scan.
    fn start_scan(&mut self) -> Result<(), RadioError>;

    /// Poll scan progress. `Done` hands the results out once.
    fn poll_scan(&mut self) -> ScanState;

    /// Begin connecting to a network. Non-blocking; progress is reported
    /// through [`connection_status`](Self::connection_status).
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError>;

    /// Current link state.
    fn connection_status(&self) -> LinkStatus;

    /// Address assigned to the station interface, if connected.
    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// Name of the network the station is connected to, if any.
    fn current_ssid(&self) -> Option<String>;

    /// Tear down the station connection.
    fn disconnect(&mut self) -> Result<(), RadioError>;

    /// Switch operating mode.
    fn set_mode(&mut self, mode: RadioMode) -> Result<(), RadioError>;

    /// Apply a static address configuration to the station interface.
    fn configure_static(&mut self, config: &StaticIpConfig) -> Result<(), RadioError>;

    /// Switch to access-point mode serving at `address`. Returns the
    /// address the device answers on.
    fn enable_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
        address: Ipv4Addr,
    ) -> Result<Ipv4Addr, RadioError>;
}

/// Errors from the radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// SSID is empty or too long for the driver.
    InvalidSsid,
    /// Passphrase is invalid for the requested security mode.
    InvalidPassphrase,
    /// Driver-level failure.
    Driver(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassphrase => write!(f, "invalid passphrase"),
            Self::Driver(msg) => write!(f, "radio driver error: {}", msg),
        }
    }
}

impl std::error::Error for RadioError {}
