//! Connectivity service.
//!
//! Stateless orchestration that turns a credential store plus live scan
//! data into a connected station, or falls back to self-hosted
//! access-point mode for provisioning. The service owns the radio,
//! watchdog and delay capabilities; no state survives a reboot except the
//! encrypted store itself, so every boot restarts at
//! [`ConnectionPhase::Idle`].

use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use super::platform::{DelayProvider, Mdns, Watchdog};
use super::radio::{LinkStatus, RadioControl, RadioMode, ScanResult, ScanState};
use super::station::{StationConfig, StationStore};
use crate::creds::{CredentialManager, StaticIpConfig};

/// Address the device answers on in access-point mode.
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Netmask of the access-point subnet.
pub const AP_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// Sub-intervals a connection attempt is polled in across its timeout.
const CONNECT_POLL_STEPS: u32 = 20;

/// Poll interval while waiting for a scan to finish.
const SCAN_POLL_INTERVAL_MS: u32 = 100;

/// Upper bound on waiting for one scan.
const SCAN_WAIT_MS: u32 = 10_000;

/// Watchdog period granted around a blocking connection attempt.
const WATCHDOG_EXTENSION: Duration = Duration::from_secs(90);

/// Where the service currently is in its connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Scanning,
    Selecting,
    Connecting,
    Connected,
    AccessPointFallback,
    /// Access point up, provisioning interface reachable.
    ProvisioningOpen,
}

/// Terminal outcome of the autonomous boot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStartOutcome {
    /// Joined a network; carries the assigned address.
    Connected(Ipv4Addr),
    /// The caller should open access-point/provisioning mode.
    AccessPointFallback(FallbackReason),
}

/// Why the autonomous path gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Nothing stored to try.
    NoCredentials,
    /// The scan never produced results.
    ScanFailed,
    /// No visible network matches a stored record.
    NoMatchingNetwork,
    /// The radio reported an explicit connection failure.
    ConnectFailed,
    /// The attempt outlived its timeout.
    Timeout,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no stored credentials"),
            Self::ScanFailed => write!(f, "scan failed"),
            Self::NoMatchingNetwork => write!(f, "no stored network visible"),
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::Timeout => write!(f, "connection timed out"),
        }
    }
}

/// Result of polling a running scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Scan still running; ask again shortly.
    InProgress,
    /// Scan failed; a new one has been started.
    Failed,
    /// Results ready; a fresh scan has been scheduled for the next caller.
    Ready(Vec<ScanResult>),
}

/// Parameters of the manual single-network connect path.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Network to join.
    pub ssid: String,
    /// Passphrase (may be empty for open networks).
    pub passphrase: String,
    /// Confirm dropping the current network if a different one is joined.
    pub change_network: bool,
    /// Persist the credentials to the legacy station configuration.
    pub persist: bool,
    /// Optional static address configuration.
    pub static_ip: Option<StaticIpConfig>,
    /// Bound on the whole attempt.
    pub timeout: Duration,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            passphrase: String::new(),
            change_network: false,
            persist: false,
            static_ip: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of the manual connect path, as an HTTP-style status/body pair
/// plus the assigned address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    pub status: u16,
    pub body: String,
    pub ip: String,
}

enum PollOutcome {
    Connected(Ipv4Addr),
    Failed(LinkStatus),
    TimedOut,
}

/// Orchestrates scanning, selection, connection and fallback.
pub struct ConnectivityService {
    radio: Box<dyn RadioControl>,
    watchdog: Box<dyn Watchdog>,
    delay: Box<dyn DelayProvider>,
    mdns: Option<Box<dyn Mdns>>,
    station_store: Option<StationStore>,
    phase: ConnectionPhase,
}

impl ConnectivityService {
    /// Create a service over the given capabilities.
    pub fn new(
        radio: Box<dyn RadioControl>,
        watchdog: Box<dyn Watchdog>,
        delay: Box<dyn DelayProvider>,
    ) -> Self {
        Self {
            radio,
            watchdog,
            delay,
            mdns: None,
            station_store: None,
            phase: ConnectionPhase::Idle,
        }
    }

    /// Attach an mDNS responder.
    pub fn with_mdns(mut self, mdns: Box<dyn Mdns>) -> Self {
        self.mdns = Some(mdns);
        self
    }

    /// Attach a legacy station-configuration store.
    pub fn with_station_store(mut self, store: StationStore) -> Self {
        self.station_store = Some(store);
        self
    }

    /// Current position in the connection state machine.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Poll the rolling network scan.
    ///
    /// A failed scan is restarted automatically; completed results are
    /// handed out once and a fresh scan is scheduled immediately so the
    /// next caller sees current data.
    pub fn scan_networks(&mut self) -> ScanOutcome {
        match self.radio.poll_scan() {
            ScanState::InProgress => ScanOutcome::InProgress,
            ScanState::Idle => {
                if let Err(e) = self.radio.start_scan() {
                    error!("failed to start scan: {}", e);
                    return ScanOutcome::Failed;
                }
                ScanOutcome::InProgress
            }
            ScanState::Failed => {
                warn!("scan failed; restarting");
                if let Err(e) = self.radio.start_scan() {
                    error!("failed to restart scan: {}", e);
                }
                ScanOutcome::Failed
            }
            ScanState::Done(results) => {
                debug!("scan produced {} network(s)", results.len());
                if let Err(e) = self.radio.start_scan() {
                    warn!("failed to schedule follow-up scan: {}", e);
                }
                ScanOutcome::Ready(results)
            }
        }
    }

    /// Render the current scan results as the JSON payload consumed by
    /// the provisioning HTTP layer. `None` while no results are ready.
    pub fn scan_networks_json(&mut self) -> Option<String> {
        match self.scan_networks() {
            ScanOutcome::Ready(results) => serde_json::to_string(&results).ok(),
            _ => None,
        }
    }

    /// Autonomous boot path: load credentials, pick the best visible
    /// stored network, connect within `timeout`, or report that the
    /// caller should fall back to access-point mode.
    pub fn start_wifi(
        &mut self,
        manager: Option<&mut CredentialManager>,
        timeout: Duration,
    ) -> WifiStartOutcome {
        self.phase = ConnectionPhase::Idle;
        self.watchdog.extend(WATCHDOG_EXTENSION);
        let outcome = self.start_wifi_inner(manager, timeout);
        self.watchdog.restore();

        match &outcome {
            WifiStartOutcome::Connected(ip) => {
                self.phase = ConnectionPhase::Connected;
                info!("network up, address {}", ip);
            }
            WifiStartOutcome::AccessPointFallback(reason) => {
                self.phase = ConnectionPhase::AccessPointFallback;
                info!("falling back to access-point mode: {}", reason);
            }
        }
        outcome
    }

    fn start_wifi_inner(
        &mut self,
        mut manager: Option<&mut CredentialManager>,
        timeout: Duration,
    ) -> WifiStartOutcome {
        if let Some(manager) = manager.as_deref_mut() {
            if let Err(e) = manager.load() {
                warn!("credential load failed, treating store as empty: {}", e);
            }
            if !manager.is_empty() {
                return self.connect_best_stored(manager, timeout);
            }
            info!("credential store is empty");
        }
        self.connect_legacy(timeout)
    }

    /// Scan, rank stored networks by signal strength, and try the best
    /// candidate. A record whose secret does not decrypt is treated as
    /// not matching; exact signal ties keep scan order.
    fn connect_best_stored(
        &mut self,
        manager: &CredentialManager,
        timeout: Duration,
    ) -> WifiStartOutcome {
        self.phase = ConnectionPhase::Scanning;
        let Some(visible) = self.await_scan() else {
            return WifiStartOutcome::AccessPointFallback(FallbackReason::ScanFailed);
        };

        self.phase = ConnectionPhase::Selecting;
        let mut candidates: Vec<&ScanResult> = visible
            .iter()
            .filter(|network| manager.position(&network.ssid).is_some())
            .collect();
        candidates.sort_by(|a, b| b.rssi.cmp(&a.rssi));

        if candidates.is_empty() {
            info!("none of {} visible network(s) is stored", visible.len());
            return WifiStartOutcome::AccessPointFallback(FallbackReason::NoMatchingNetwork);
        }

        for network in candidates {
            let Some(passphrase) = manager.password_for(&network.ssid) else {
                warn!(
                    "stored secret for {} did not decrypt; treating as no match",
                    network.ssid
                );
                continue;
            };
            let ip = manager.ip_config(&network.ssid).unwrap_or_default();
            info!("joining {} at {} dBm", network.ssid, network.rssi);
            return self.connect_station(&network.ssid, &passphrase, ip, timeout);
        }

        WifiStartOutcome::AccessPointFallback(FallbackReason::NoMatchingNetwork)
    }

    /// Secondary path: one stored legacy station configuration.
    fn connect_legacy(&mut self, timeout: Duration) -> WifiStartOutcome {
        let Some(config) = self.station_store.as_ref().and_then(|store| store.load()) else {
            return WifiStartOutcome::AccessPointFallback(FallbackReason::NoCredentials);
        };
        info!("trying legacy station configuration for {}", config.ssid);
        self.connect_station(
            &config.ssid,
            &config.passphrase,
            StaticIpConfig::DYNAMIC,
            timeout,
        )
    }

    fn connect_station(
        &mut self,
        ssid: &str,
        passphrase: &str,
        ip: StaticIpConfig,
        timeout: Duration,
    ) -> WifiStartOutcome {
        self.phase = ConnectionPhase::Connecting;
        if ip.is_static() {
            if let Err(e) = self.radio.configure_static(&ip) {
                warn!("static address configuration failed: {}", e);
            }
        }
        if let Err(e) = self.radio.begin_station(ssid, passphrase) {
            error!("failed to start connection to {}: {}", ssid, e);
            return WifiStartOutcome::AccessPointFallback(FallbackReason::ConnectFailed);
        }

        match self.poll_connection(timeout) {
            PollOutcome::Connected(ip) => WifiStartOutcome::Connected(ip),
            PollOutcome::Failed(status) => {
                warn!("connection to {} failed: {:?}", ssid, status);
                WifiStartOutcome::AccessPointFallback(FallbackReason::ConnectFailed)
            }
            PollOutcome::TimedOut => {
                warn!("connection to {} timed out", ssid);
                WifiStartOutcome::AccessPointFallback(FallbackReason::Timeout)
            }
        }
    }

    /// Manual single-network path used by the provisioning form.
    ///
    /// Joining a *different* network than the current one requires
    /// `change_network`; otherwise a confirmation prompt is returned so an
    /// operator's session is never dropped silently.
    pub fn connect_with_params(&mut self, params: &ConnectParams) -> ConnectOutcome {
        if params.ssid.is_empty() {
            return ConnectOutcome {
                status: 400,
                body: "SSID must not be empty".to_string(),
                ip: String::new(),
            };
        }

        if self.radio.connection_status() == LinkStatus::Connected && !params.change_network {
            if let Some(current) = self.radio.current_ssid() {
                if current != params.ssid {
                    info!(
                        "refusing silent network change from {} to {}",
                        current, params.ssid
                    );
                    let ip = self
                        .radio
                        .local_ip()
                        .map(|ip| ip.to_string())
                        .unwrap_or_default();
                    return ConnectOutcome {
                        status: 409,
                        body: format!(
                            "already connected to {}; confirm the network change to switch",
                            current
                        ),
                        ip,
                    };
                }
            }
        }

        self.watchdog.extend(WATCHDOG_EXTENSION);
        let outcome = self.connect_with_params_inner(params);
        self.watchdog.restore();
        outcome
    }

    fn connect_with_params_inner(&mut self, params: &ConnectParams) -> ConnectOutcome {
        if matches!(
            self.phase,
            ConnectionPhase::ProvisioningOpen | ConnectionPhase::AccessPointFallback
        ) {
            // Keep the provisioning page reachable while the new network
            // is tried.
            if let Err(e) = self.radio.set_mode(RadioMode::Dual) {
                warn!("could not enter dual mode: {}", e);
            }
        }
        self.phase = ConnectionPhase::Connecting;

        if let Some(ip) = params.static_ip {
            if ip.is_static() {
                if let Err(e) = self.radio.configure_static(&ip) {
                    warn!("static address configuration failed: {}", e);
                }
            }
        }

        if params.persist {
            self.persist_station_config(params);
        }

        if let Err(e) = self.radio.begin_station(&params.ssid, &params.passphrase) {
            error!("failed to start connection to {}: {}", params.ssid, e);
            self.phase = ConnectionPhase::AccessPointFallback;
            return ConnectOutcome {
                status: 500,
                body: format!("failed to start connection: {}", e),
                ip: String::new(),
            };
        }

        match self.poll_connection(params.timeout) {
            PollOutcome::Connected(ip) => {
                if let Err(e) = self.radio.set_mode(RadioMode::Station) {
                    debug!("could not leave dual mode: {}", e);
                }
                self.phase = ConnectionPhase::Connected;
                info!("connected to {}, address {}", params.ssid, ip);
                ConnectOutcome {
                    status: 200,
                    body: format!("connected to {}", params.ssid),
                    ip: ip.to_string(),
                }
            }
            PollOutcome::Failed(LinkStatus::AuthFailed) => {
                self.phase = ConnectionPhase::AccessPointFallback;
                ConnectOutcome {
                    status: 401,
                    body: format!("authentication to {} failed", params.ssid),
                    ip: String::new(),
                }
            }
            PollOutcome::Failed(LinkStatus::SsidNotFound) => {
                self.phase = ConnectionPhase::AccessPointFallback;
                ConnectOutcome {
                    status: 404,
                    body: format!("network {} not found", params.ssid),
                    ip: String::new(),
                }
            }
            PollOutcome::Failed(status) => {
                self.phase = ConnectionPhase::AccessPointFallback;
                ConnectOutcome {
                    status: 500,
                    body: format!("connection to {} failed: {:?}", params.ssid, status),
                    ip: String::new(),
                }
            }
            PollOutcome::TimedOut => {
                self.phase = ConnectionPhase::AccessPointFallback;
                ConnectOutcome {
                    status: 408,
                    body: format!("connection to {} timed out", params.ssid),
                    ip: String::new(),
                }
            }
        }
    }

    fn persist_station_config(&mut self, params: &ConnectParams) {
        let Some(store) = self.station_store.as_mut() else {
            debug!("no station store configured; skipping persist");
            return;
        };
        match StationConfig::new(params.ssid.clone(), params.passphrase.clone()) {
            Ok(config) => {
                if let Err(e) = store.save(&config) {
                    warn!("failed to persist station configuration: {}", e);
                }
            }
            Err(e) => warn!("not persisting invalid station configuration: {}", e),
        }
    }

    /// Switch the radio to self-hosted access-point mode on the fixed
    /// provisioning subnet. Returns the address the device answers on.
    pub fn start_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<Ipv4Addr, super::radio::RadioError> {
        info!("starting access point {}", ssid);
        let address = self.radio.enable_access_point(ssid, passphrase, AP_ADDRESS)?;
        self.phase = ConnectionPhase::ProvisioningOpen;
        info!("access point up at {}", address);
        Ok(address)
    }

    /// Register the device's hostname and HTTP service over mDNS.
    /// Best-effort; failures are logged and never fatal.
    pub fn start_mdns(&mut self, hostname: &str) {
        let Some(mdns) = self.mdns.as_mut() else {
            debug!("no mDNS responder configured");
            return;
        };
        if let Err(e) = mdns.set_hostname(hostname) {
            warn!("mDNS hostname registration failed: {}", e);
            return;
        }
        if let Err(e) = mdns.add_http_service(80) {
            warn!("mDNS service registration failed: {}", e);
            return;
        }
        info!("mDNS responder registered as {}", hostname);
    }

    /// Register only the hostname over mDNS, without a service entry.
    pub fn start_mdns_only(&mut self, hostname: &str) {
        let Some(mdns) = self.mdns.as_mut() else {
            debug!("no mDNS responder configured");
            return;
        };
        if let Err(e) = mdns.set_hostname(hostname) {
            warn!("mDNS hostname registration failed: {}", e);
            return;
        }
        info!("mDNS hostname registered as {}", hostname);
    }

    /// Drive a started scan to completion, feeding the watchdog while it
    /// runs.
    fn await_scan(&mut self) -> Option<Vec<ScanResult>> {
        match self.radio.poll_scan() {
            ScanState::Done(results) => return Some(results),
            ScanState::InProgress => {}
            ScanState::Idle | ScanState::Failed => {
                if let Err(e) = self.radio.start_scan() {
                    error!("failed to start scan: {}", e);
                    return None;
                }
            }
        }

        let mut waited_ms = 0u32;
        loop {
            match self.radio.poll_scan() {
                ScanState::Done(results) => return Some(results),
                ScanState::Failed => {
                    warn!("scan failed");
                    return None;
                }
                ScanState::Idle | ScanState::InProgress => {}
            }
            if waited_ms >= SCAN_WAIT_MS {
                warn!("scan did not finish within {} ms", SCAN_WAIT_MS);
                return None;
            }
            self.watchdog.feed();
            self.delay.delay_ms(SCAN_POLL_INTERVAL_MS);
            waited_ms += SCAN_POLL_INTERVAL_MS;
        }
    }

    /// Poll the link state in fixed sub-intervals across `timeout`,
    /// re-arming the watchdog on every tick.
    fn poll_connection(&mut self, timeout: Duration) -> PollOutcome {
        let step_ms = ((timeout.as_millis() as u64) / CONNECT_POLL_STEPS as u64).max(1) as u32;
        for _ in 0..CONNECT_POLL_STEPS {
            self.watchdog.feed();
            match self.radio.connection_status() {
                LinkStatus::Connected => {
                    let ip = self.radio.local_ip().unwrap_or(Ipv4Addr::UNSPECIFIED);
                    return PollOutcome::Connected(ip);
                }
                status @ (LinkStatus::AuthFailed | LinkStatus::SsidNotFound | LinkStatus::Failed) => {
                    return PollOutcome::Failed(status);
                }
                LinkStatus::Idle | LinkStatus::Connecting => {}
            }
            self.delay.delay_ms(step_ms);
        }
        PollOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::super::platform::MdnsError;
    use super::super::radio::RadioError;
    use super::*;
    use crate::creds::{encrypt_secret, KeyContext, CredentialManager, FALLBACK_KEY};
    use crate::storage::{KvBackend, KvStorage, KvValue, MemoryKv};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    // ==================== Stubs ====================

    #[derive(Default)]
    struct RadioLog {
        scans_started: u32,
        begun: Vec<(String, String)>,
        static_configs: Vec<StaticIpConfig>,
        modes: Vec<RadioMode>,
        access_points: Vec<String>,
    }

    struct StubRadio {
        scan_results: Vec<ScanResult>,
        scan_fails: bool,
        statuses: RefCell<VecDeque<LinkStatus>>,
        default_status: LinkStatus,
        ip: Option<Ipv4Addr>,
        current: Option<String>,
        pending_scan: Option<ScanState>,
        log: Rc<RefCell<RadioLog>>,
    }

    impl StubRadio {
        fn new() -> (Self, Rc<RefCell<RadioLog>>) {
            let log = Rc::new(RefCell::new(RadioLog::default()));
            (
                Self {
                    scan_results: Vec::new(),
                    scan_fails: false,
                    statuses: RefCell::new(VecDeque::new()),
                    default_status: LinkStatus::Idle,
                    ip: None,
                    current: None,
                    pending_scan: None,
                    log: log.clone(),
                },
                log,
            )
        }

        fn with_scan(mut self, results: Vec<ScanResult>) -> Self {
            self.scan_results = results;
            self
        }

        fn with_statuses(self, statuses: &[LinkStatus]) -> Self {
            *self.statuses.borrow_mut() = statuses.iter().copied().collect();
            self
        }

        fn with_ip(mut self, ip: Ipv4Addr) -> Self {
            self.ip = Some(ip);
            self
        }
    }

    impl RadioControl for StubRadio {
        fn start_scan(&mut self) -> Result<(), RadioError> {
            self.log.borrow_mut().scans_started += 1;
            self.pending_scan = Some(if self.scan_fails {
                ScanState::Failed
            } else {
                ScanState::Done(self.scan_results.clone())
            });
            Ok(())
        }

        fn poll_scan(&mut self) -> ScanState {
            self.pending_scan.take().unwrap_or(ScanState::Idle)
        }

        fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
            self.log
                .borrow_mut()
                .begun
                .push((ssid.to_string(), passphrase.to_string()));
            Ok(())
        }

        fn connection_status(&self) -> LinkStatus {
            self.statuses
                .borrow_mut()
                .pop_front()
                .unwrap_or(self.default_status)
        }

        fn local_ip(&self) -> Option<Ipv4Addr> {
            self.ip
        }

        fn current_ssid(&self) -> Option<String> {
            self.current.clone()
        }

        fn disconnect(&mut self) -> Result<(), RadioError> {
            Ok(())
        }

        fn set_mode(&mut self, mode: RadioMode) -> Result<(), RadioError> {
            self.log.borrow_mut().modes.push(mode);
            Ok(())
        }

        fn configure_static(&mut self, config: &StaticIpConfig) -> Result<(), RadioError> {
            self.log.borrow_mut().static_configs.push(*config);
            Ok(())
        }

        fn enable_access_point(
            &mut self,
            ssid: &str,
            _passphrase: &str,
            address: Ipv4Addr,
        ) -> Result<Ipv4Addr, RadioError> {
            self.log.borrow_mut().access_points.push(ssid.to_string());
            Ok(address)
        }
    }

    #[derive(Default)]
    struct WatchdogLog {
        extends: u32,
        feeds: u32,
        restores: u32,
    }

    struct StubWatchdog(Rc<RefCell<WatchdogLog>>);

    impl StubWatchdog {
        fn new() -> (Self, Rc<RefCell<WatchdogLog>>) {
            let log = Rc::new(RefCell::new(WatchdogLog::default()));
            (Self(log.clone()), log)
        }
    }

    impl Watchdog for StubWatchdog {
        fn extend(&mut self, _period: Duration) {
            self.0.borrow_mut().extends += 1;
        }
        fn feed(&mut self) {
            self.0.borrow_mut().feeds += 1;
        }
        fn restore(&mut self) {
            self.0.borrow_mut().restores += 1;
        }
    }

    struct InstantDelay;

    impl DelayProvider for InstantDelay {
        fn delay_ms(&mut self, _ms: u32) {}
    }

    #[derive(Default)]
    struct MdnsLog {
        hostnames: Vec<String>,
        services: Vec<u16>,
    }

    struct StubMdns {
        fail: bool,
        log: Rc<RefCell<MdnsLog>>,
    }

    impl StubMdns {
        fn new(fail: bool) -> (Self, Rc<RefCell<MdnsLog>>) {
            let log = Rc::new(RefCell::new(MdnsLog::default()));
            (Self { fail, log: log.clone() }, log)
        }
    }

    impl Mdns for StubMdns {
        fn set_hostname(&mut self, hostname: &str) -> Result<(), MdnsError> {
            if self.fail {
                return Err(MdnsError::Driver("responder unavailable".into()));
            }
            self.log.borrow_mut().hostnames.push(hostname.to_string());
            Ok(())
        }

        fn add_http_service(&mut self, port: u16) -> Result<(), MdnsError> {
            if self.fail {
                return Err(MdnsError::Driver("responder unavailable".into()));
            }
            self.log.borrow_mut().services.push(port);
            Ok(())
        }
    }

    fn service(radio: StubRadio) -> ConnectivityService {
        let _ = env_logger::builder().is_test(true).try_init();
        let (watchdog, _) = StubWatchdog::new();
        ConnectivityService::new(Box::new(radio), Box::new(watchdog), Box::new(InstantDelay))
    }

    fn net(ssid: &str, rssi: i32) -> ScanResult {
        ScanResult {
            ssid: ssid.to_string(),
            rssi,
            secured: true,
        }
    }

    fn manager_with(creds: &[(&str, &str)]) -> CredentialManager {
        let mut mgr = CredentialManager::new(Box::new(KvBackend::new(Box::new(MemoryKv::new()))));
        for (ssid, secret) in creds {
            mgr.add_credential(ssid, secret, StaticIpConfig::DYNAMIC)
                .unwrap();
        }
        mgr.persist().unwrap();
        mgr
    }

    // ==================== Autonomous Boot Tests ====================

    #[test]
    fn test_boot_connects_to_stored_network() {
        let mut mgr = manager_with(&[("Office", "S3cret!")]);

        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("Office", -55)])
            .with_statuses(&[LinkStatus::Connecting, LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(192, 168, 1, 77));
        let (watchdog, wd_log) = StubWatchdog::new();
        let mut svc =
            ConnectivityService::new(Box::new(radio), Box::new(watchdog), Box::new(InstantDelay));

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(5000));
        assert_eq!(
            outcome,
            WifiStartOutcome::Connected(Ipv4Addr::new(192, 168, 1, 77))
        );
        assert_eq!(svc.phase(), ConnectionPhase::Connected);

        let log = log.borrow();
        assert_eq!(log.begun, vec![("Office".to_string(), "S3cret!".to_string())]);

        let wd = wd_log.borrow();
        assert_eq!(wd.extends, 1);
        assert_eq!(wd.restores, 1);
        assert!(wd.feeds > 0);
    }

    #[test]
    fn test_empty_store_falls_back_without_scanning() {
        let mut mgr = manager_with(&[]);
        let (radio, log) = StubRadio::new();
        let mut svc = service(radio);

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert_eq!(
            outcome,
            WifiStartOutcome::AccessPointFallback(FallbackReason::NoCredentials)
        );
        assert_eq!(svc.phase(), ConnectionPhase::AccessPointFallback);
        assert_eq!(log.borrow().scans_started, 0);
        assert!(log.borrow().begun.is_empty());
    }

    #[test]
    fn test_strongest_signal_wins() {
        let mut mgr = manager_with(&[("NearNet", "password-a"), ("FarNet", "password-b")]);
        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("FarNet", -70), net("NearNet", -40)])
            .with_statuses(&[LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(10, 0, 0, 2));
        let mut svc = service(radio);

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert!(matches!(outcome, WifiStartOutcome::Connected(_)));
        assert_eq!(log.borrow().begun[0].0, "NearNet");
    }

    #[test]
    fn test_exact_tie_keeps_scan_order() {
        let mut mgr = manager_with(&[("First", "password-a"), ("Second", "password-b")]);
        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("First", -50), net("Second", -50)])
            .with_statuses(&[LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(10, 0, 0, 2));
        let mut svc = service(radio);

        svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert_eq!(log.borrow().begun[0].0, "First");
    }

    #[test]
    fn test_no_visible_match_falls_back() {
        let mut mgr = manager_with(&[("Office", "S3cret!")]);
        let (radio, _) = StubRadio::new();
        let radio = radio.with_scan(vec![net("Stranger", -30)]);
        let mut svc = service(radio);

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert_eq!(
            outcome,
            WifiStartOutcome::AccessPointFallback(FallbackReason::NoMatchingNetwork)
        );
    }

    #[test]
    fn test_undecryptable_record_is_skipped() {
        // Build the persisted store by hand: one record whose ciphertext
        // decrypts to an invalid pad byte, one good record.
        use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};

        let key = KeyContext::fallback();
        let mut bad_block = [0x41u8; 16];
        bad_block[15] = 0x00; // pad byte zero never validates
        let cipher = aes::Aes256::new((&FALLBACK_KEY).into());
        let mut block = GenericArray::from(bad_block);
        cipher.encrypt_block(&mut block);

        let good_cipher = encrypt_secret(&key, b"S3cret!").unwrap();

        let mut kv = MemoryKv::new();
        kv.insert("count", KvValue::U8(2));
        for (i, (name, secret)) in [("Ghost", block.to_vec()), ("Office", good_cipher)]
            .iter()
            .enumerate()
        {
            kv.insert(format!("name{}", i), KvValue::Str(name.to_string()));
            kv.insert(format!("secret{}", i), KvValue::Blob(secret.clone()));
            kv.insert(format!("len{}", i), KvValue::U16(secret.len() as u16));
            kv.insert(format!("gateway{}", i), KvValue::U32(0));
            kv.insert(format!("subnet{}", i), KvValue::U32(0));
            kv.insert(format!("address{}", i), KvValue::U32(0));
        }
        let mut mgr = CredentialManager::new(Box::new(KvBackend::new(Box::new(kv))));

        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("Ghost", -30), net("Office", -60)])
            .with_statuses(&[LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(10, 0, 0, 2));
        let mut svc = service(radio);

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert!(matches!(outcome, WifiStartOutcome::Connected(_)));
        assert_eq!(log.borrow().begun[0].0, "Office");
    }

    #[test]
    fn test_explicit_failure_falls_back() {
        let mut mgr = manager_with(&[("Office", "S3cret!")]);
        let (radio, _) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("Office", -55)])
            .with_statuses(&[LinkStatus::Connecting, LinkStatus::AuthFailed]);
        let mut svc = service(radio);

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert_eq!(
            outcome,
            WifiStartOutcome::AccessPointFallback(FallbackReason::ConnectFailed)
        );
    }

    #[test]
    fn test_timeout_falls_back_and_feeds_watchdog() {
        let mut mgr = manager_with(&[("Office", "S3cret!")]);
        let (radio, _) = StubRadio::new();
        let radio = radio.with_scan(vec![net("Office", -55)]); // status stays Idle
        let (watchdog, wd_log) = StubWatchdog::new();
        let mut svc =
            ConnectivityService::new(Box::new(radio), Box::new(watchdog), Box::new(InstantDelay));

        let outcome = svc.start_wifi(Some(&mut mgr), Duration::from_millis(2000));
        assert_eq!(
            outcome,
            WifiStartOutcome::AccessPointFallback(FallbackReason::Timeout)
        );
        // One feed per poll sub-interval, at least.
        assert!(wd_log.borrow().feeds >= CONNECT_POLL_STEPS);
    }

    #[test]
    fn test_static_ip_applied_before_connect() {
        let config = StaticIpConfig::new(
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        let mut mgr = manager_with(&[]);
        mgr.add_credential("Office", "S3cret!", config).unwrap();
        mgr.persist().unwrap();

        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_scan(vec![net("Office", -55)])
            .with_statuses(&[LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(192, 168, 1, 50));
        let mut svc = service(radio);

        svc.start_wifi(Some(&mut mgr), Duration::from_millis(1000));
        assert_eq!(log.borrow().static_configs, vec![config]);
    }

    #[test]
    fn test_legacy_station_path() {
        let mut kv = MemoryKv::new();
        kv.set_blob(
            "station",
            &StationConfig::new("HomeNet", "password123").unwrap().to_bytes(),
        )
        .unwrap();

        let (radio, log) = StubRadio::new();
        let radio = radio
            .with_statuses(&[LinkStatus::Connected])
            .with_ip(Ipv4Addr::new(192, 168, 1, 9));
        let (watchdog, _) = StubWatchdog::new();
        let mut svc =
            ConnectivityService::new(Box::new(radio), Box::new(watchdog), Box::new(InstantDelay))
                .with_station_store(StationStore::new(Box::new(kv)));

        let outcome = svc.start_wifi(None, Duration::from_millis(1000));
        assert_eq!(
            outcome,
            WifiStartOutcome::Connected(Ipv4Addr::new(192, 168, 1, 9))
        );
        assert_eq!(
            log.borrow().begun,
            vec![("HomeNet".to_string(), "password123".to_string())]
        );
    }

    // ==================== Manual Connect Tests ====================

    #[test]
    fn test_connect_prompts_before_changing_network() {
        let (mut radio, log) = StubRadio::new();
        radio.default_status = LinkStatus::Connected;
        radio.current = Some("OldNet".to_string());
        let radio = radio.with_ip(Ipv4Addr::new(192, 168, 1, 5));
        let mut svc = service(radio);

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "newpass123".to_string(),
            ..Default::default()
        });
        assert_eq!(outcome.status, 409);
        assert!(outcome.body.contains("OldNet"));
        assert_eq!(outcome.ip, "192.168.1.5");
        assert!(log.borrow().begun.is_empty());
    }

    #[test]
    fn test_connect_with_change_confirmed() {
        let (mut radio, log) = StubRadio::new();
        radio.default_status = LinkStatus::Connected;
        radio.current = Some("OldNet".to_string());
        let radio = radio.with_ip(Ipv4Addr::new(192, 168, 1, 5));
        let mut svc = service(radio);

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "newpass123".to_string(),
            change_network: true,
            ..Default::default()
        });
        assert_eq!(outcome.status, 200);
        assert_eq!(log.borrow().begun[0].0, "NewNet");
    }

    #[test]
    fn test_connect_auth_failure_is_401() {
        let (radio, _) = StubRadio::new();
        let radio = radio.with_statuses(&[LinkStatus::Idle, LinkStatus::AuthFailed]);
        let mut svc = service(radio);

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "wrong-pass".to_string(),
            ..Default::default()
        });
        assert_eq!(outcome.status, 401);
        assert!(outcome.ip.is_empty());
    }

    #[test]
    fn test_connect_unknown_network_is_404() {
        let (radio, _) = StubRadio::new();
        let radio = radio.with_statuses(&[LinkStatus::Idle, LinkStatus::SsidNotFound]);
        let mut svc = service(radio);

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "Ghost".to_string(),
            ..Default::default()
        });
        assert_eq!(outcome.status, 404);
    }

    #[test]
    fn test_connect_timeout_is_408() {
        let (radio, _) = StubRadio::new();
        let mut svc = service(radio); // status stays Idle

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "newpass123".to_string(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        });
        assert_eq!(outcome.status, 408);
        assert_eq!(svc.phase(), ConnectionPhase::AccessPointFallback);
    }

    #[test]
    fn test_connect_empty_ssid_is_400() {
        let (radio, _) = StubRadio::new();
        let mut svc = service(radio);
        let outcome = svc.connect_with_params(&ConnectParams::default());
        assert_eq!(outcome.status, 400);
    }

    #[test]
    fn test_connect_persists_then_legacy_path_uses_it() {
        let (radio, log) = StubRadio::new();
        let mut radio = radio.with_ip(Ipv4Addr::new(10, 0, 0, 3));
        radio.default_status = LinkStatus::Connected;
        let (watchdog, _) = StubWatchdog::new();
        let mut svc =
            ConnectivityService::new(Box::new(radio), Box::new(watchdog), Box::new(InstantDelay))
                .with_station_store(StationStore::new(Box::new(MemoryKv::new())));

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "newpass123".to_string(),
            persist: true,
            change_network: true,
            ..Default::default()
        });
        assert_eq!(outcome.status, 200);

        // The persisted configuration now drives the legacy boot path.
        let outcome = svc.start_wifi(None, Duration::from_millis(1000));
        assert!(matches!(outcome, WifiStartOutcome::Connected(_)));
        let log = log.borrow();
        assert_eq!(log.begun[1], ("NewNet".to_string(), "newpass123".to_string()));
    }

    #[test]
    fn test_dual_mode_during_provisioning_reconnect() {
        let (radio, log) = StubRadio::new();
        let mut radio = radio.with_ip(Ipv4Addr::new(10, 0, 0, 3));
        radio.default_status = LinkStatus::Connected;
        radio.current = Some("NewNet".to_string());
        let mut svc = service(radio);

        svc.start_access_point("Setup-AP", "").unwrap();
        assert_eq!(svc.phase(), ConnectionPhase::ProvisioningOpen);

        let outcome = svc.connect_with_params(&ConnectParams {
            ssid: "NewNet".to_string(),
            passphrase: "newpass123".to_string(),
            ..Default::default()
        });
        assert_eq!(outcome.status, 200);

        let log = log.borrow();
        assert_eq!(log.modes, vec![RadioMode::Dual, RadioMode::Station]);
    }

    // ==================== Access Point and mDNS Tests ====================

    #[test]
    fn test_start_access_point_uses_fixed_subnet() {
        let (radio, log) = StubRadio::new();
        let mut svc = service(radio);

        let address = svc.start_access_point("Setup-AP", "configure-me").unwrap();
        assert_eq!(address, AP_ADDRESS);
        assert_eq!(svc.phase(), ConnectionPhase::ProvisioningOpen);
        assert_eq!(log.borrow().access_points, vec!["Setup-AP".to_string()]);
    }

    #[test]
    fn test_mdns_registration() {
        let (radio, _) = StubRadio::new();
        let (mdns, mdns_log) = StubMdns::new(false);
        let mut svc = service(radio).with_mdns(Box::new(mdns));

        svc.start_mdns("vault-device");
        let log = mdns_log.borrow();
        assert_eq!(log.hostnames, vec!["vault-device".to_string()]);
        assert_eq!(log.services, vec![80]);
    }

    #[test]
    fn test_mdns_only_skips_service() {
        let (radio, _) = StubRadio::new();
        let (mdns, mdns_log) = StubMdns::new(false);
        let mut svc = service(radio).with_mdns(Box::new(mdns));

        svc.start_mdns_only("vault-device");
        let log = mdns_log.borrow();
        assert_eq!(log.hostnames, vec!["vault-device".to_string()]);
        assert!(log.services.is_empty());
    }

    #[test]
    fn test_mdns_failure_is_not_fatal() {
        let (radio, _) = StubRadio::new();
        let (mdns, mdns_log) = StubMdns::new(true);
        let mut svc = service(radio).with_mdns(Box::new(mdns));

        svc.start_mdns("vault-device");
        assert!(mdns_log.borrow().hostnames.is_empty());
    }

    // ==================== Scan Polling Tests ====================

    #[test]
    fn test_scan_tri_state_polling() {
        let (radio, _) = StubRadio::new();
        let radio = radio.with_scan(vec![net("Office", -55)]);
        let mut svc = service(radio);

        // First call starts the scan.
        assert_eq!(svc.scan_networks(), ScanOutcome::InProgress);
        // Second call collects results and re-arms the scan.
        match svc.scan_networks() {
            ScanOutcome::Ready(results) => assert_eq!(results[0].ssid, "Office"),
            other => panic!("expected results, got {:?}", other),
        }
        // The follow-up scan is already running again.
        match svc.scan_networks() {
            ScanOutcome::Ready(_) => {}
            other => panic!("expected re-armed scan results, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_failure_restarts() {
        let (mut radio, log) = StubRadio::new();
        radio.scan_fails = true;
        let mut svc = service(radio);

        assert_eq!(svc.scan_networks(), ScanOutcome::InProgress);
        assert_eq!(svc.scan_networks(), ScanOutcome::Failed);
        // Failed poll triggered a restart.
        assert_eq!(log.borrow().scans_started, 2);
    }

    #[test]
    fn test_scan_json_payload() {
        let (radio, _) = StubRadio::new();
        let radio = radio.with_scan(vec![ScanResult {
            ssid: "Office".to_string(),
            rssi: -55,
            secured: true,
        }]);
        let mut svc = service(radio);

        assert!(svc.scan_networks_json().is_none());
        let payload = svc.scan_networks_json().expect("results ready");
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json[0]["ssid"], "Office");
        assert_eq!(json[0]["strength"], -55);
        assert_eq!(json[0]["security"], true);
    }
}
