//! ESP-IDF implementations of the radio and platform capabilities.
//!
//! Thin adapters: connection policy (selection, retry, fallback) lives in
//! [`super::service`]; this module only maps the capability traits onto
//! the ESP-IDF drivers.

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use esp_idf_sys::EspError;
use log::{debug, info};
use std::net::Ipv4Addr;
use std::time::Duration;

use super::platform::{DelayProvider, Mdns, MdnsError, Watchdog};
use super::radio::{LinkStatus, RadioControl, RadioError, RadioMode, ScanResult, ScanState};
use crate::creds::StaticIpConfig;

fn map_err(e: EspError) -> RadioError {
    RadioError::Driver(format!("{:?}", e))
}

/// [`RadioControl`] over the ESP-IDF WiFi driver.
pub struct EspRadio<'a> {
    wifi: EspWifi<'a>,
    scanning: bool,
}

impl<'a> EspRadio<'a> {
    /// Wrap an initialized WiFi driver.
    pub fn new(wifi: EspWifi<'a>, _sysloop: EspSystemEventLoop) -> Self {
        Self {
            wifi,
            scanning: false,
        }
    }

    fn ensure_started(&mut self) -> Result<(), RadioError> {
        if !self.wifi.is_started().map_err(map_err)? {
            self.wifi.start().map_err(map_err)?;
        }
        Ok(())
    }
}

impl<'a> RadioControl for EspRadio<'a> {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.ensure_started()?;
        self.wifi
            .driver_mut()
            .start_scan(&Default::default(), false)
            .map_err(map_err)?;
        self.scanning = true;
        Ok(())
    }

    fn poll_scan(&mut self) -> ScanState {
        if !self.scanning {
            return ScanState::Idle;
        }
        match self.wifi.driver().is_scan_done() {
            Ok(false) => ScanState::InProgress,
            Ok(true) => {
                self.scanning = false;
                match self.wifi.driver_mut().get_scan_result() {
                    Ok(aps) => ScanState::Done(
                        aps.into_iter()
                            .map(|ap| ScanResult {
                                ssid: ap.ssid.to_string(),
                                rssi: ap.signal_strength as i32,
                                secured: !matches!(ap.auth_method, Some(AuthMethod::None)),
                            })
                            .collect(),
                    ),
                    Err(e) => {
                        debug!("failed to collect scan results: {:?}", e);
                        ScanState::Failed
                    }
                }
            }
            Err(e) => {
                debug!("scan poll failed: {:?}", e);
                self.scanning = false;
                ScanState::Failed
            }
        }
    }

    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
        let auth_method = if passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
            password: passphrase
                .try_into()
                .map_err(|_| RadioError::InvalidPassphrase)?,
            auth_method,
            ..Default::default()
        };

        // Preserve a running access point when in dual mode.
        let config = match self.wifi.get_configuration().map_err(map_err)? {
            Configuration::AccessPoint(ap) | Configuration::Mixed(_, ap) => {
                Configuration::Mixed(client, ap)
            }
            _ => Configuration::Client(client),
        };
        self.wifi.set_configuration(&config).map_err(map_err)?;
        self.ensure_started()?;
        self.wifi.connect().map_err(map_err)?;
        info!("connection to {} started", ssid);
        Ok(())
    }

    fn connection_status(&self) -> LinkStatus {
        match self.wifi.is_connected() {
            Ok(true) => LinkStatus::Connected,
            Ok(false) => LinkStatus::Connecting,
            Err(_) => LinkStatus::Failed,
        }
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| Ipv4Addr::from(info.ip.octets()))
    }

    fn current_ssid(&self) -> Option<String> {
        match self.wifi.get_configuration().ok()? {
            Configuration::Client(client) | Configuration::Mixed(client, _) => {
                Some(client.ssid.to_string())
            }
            _ => None,
        }
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.wifi.disconnect().map_err(map_err)
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), RadioError> {
        let current = self.wifi.get_configuration().map_err(map_err)?;
        let config = match (mode, current) {
            (RadioMode::Station, Configuration::Mixed(client, _)) => Configuration::Client(client),
            (RadioMode::Station, other) => other,
            (RadioMode::AccessPoint, Configuration::Mixed(_, ap))
            | (RadioMode::AccessPoint, Configuration::AccessPoint(ap)) => {
                Configuration::AccessPoint(ap)
            }
            (RadioMode::AccessPoint, _) => {
                Configuration::AccessPoint(AccessPointConfiguration::default())
            }
            (RadioMode::Dual, Configuration::Client(client)) => {
                Configuration::Mixed(client, AccessPointConfiguration::default())
            }
            (RadioMode::Dual, Configuration::AccessPoint(ap)) => {
                Configuration::Mixed(ClientConfiguration::default(), ap)
            }
            (RadioMode::Dual, other) => other,
        };
        self.wifi.set_configuration(&config).map_err(map_err)
    }

    fn configure_static(&mut self, config: &StaticIpConfig) -> Result<(), RadioError> {
        use esp_idf_svc::ipv4::{
            ClientConfiguration as IpClientConfiguration, ClientSettings, Mask, Subnet,
        };
        use esp_idf_svc::netif::{EspNetif, NetifConfiguration};

        let prefix = u32::from(config.subnet).count_ones() as u8;
        let settings = ClientSettings {
            ip: config.address.octets().into(),
            subnet: Subnet {
                gateway: config.gateway.octets().into(),
                mask: Mask(prefix),
            },
            dns: None,
            secondary_dns: None,
        };
        let netif_config = NetifConfiguration {
            ip_configuration: Some(esp_idf_svc::ipv4::Configuration::Client(
                IpClientConfiguration::Fixed(settings),
            )),
            ..NetifConfiguration::wifi_default_client()
        };
        let netif = EspNetif::new_with_conf(&netif_config).map_err(map_err)?;
        self.wifi.swap_netif_sta(netif).map_err(map_err)?;
        Ok(())
    }

    fn enable_access_point(
        &mut self,
        ssid: &str,
        passphrase: &str,
        address: Ipv4Addr,
    ) -> Result<Ipv4Addr, RadioError> {
        let auth_method = if passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let ap = AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
            password: passphrase
                .try_into()
                .map_err(|_| RadioError::InvalidPassphrase)?,
            auth_method,
            ..Default::default()
        };
        self.wifi
            .set_configuration(&Configuration::AccessPoint(ap))
            .map_err(map_err)?;
        self.ensure_started()?;

        // The ESP-IDF default AP address matches the fixed provisioning
        // subnet; report the actual interface address.
        let actual = self
            .wifi
            .ap_netif()
            .get_ip_info()
            .map(|info| Ipv4Addr::from(info.ip.octets()))
            .unwrap_or(address);
        Ok(actual)
    }
}

/// Default task watchdog period restored after a blocking attempt.
const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_secs(5);

/// Task watchdog re-armed via the ESP-IDF task WDT.
pub struct EspTaskWatchdog;

impl EspTaskWatchdog {
    fn reconfigure(period: Duration) {
        let config = esp_idf_sys::esp_task_wdt_config_t {
            timeout_ms: period.as_millis() as u32,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        unsafe {
            esp_idf_sys::esp_task_wdt_reconfigure(&config);
        }
    }
}

impl Watchdog for EspTaskWatchdog {
    fn extend(&mut self, period: Duration) {
        debug!("extending task watchdog to {:?}", period);
        Self::reconfigure(period);
    }

    fn feed(&mut self) {
        unsafe {
            esp_idf_sys::esp_task_wdt_reset();
        }
    }

    fn restore(&mut self) {
        Self::reconfigure(DEFAULT_WATCHDOG_PERIOD);
    }
}

/// Delay via the FreeRTOS scheduler.
pub struct EspDelay;

impl DelayProvider for EspDelay {
    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

/// [`Mdns`] over the ESP-IDF mDNS responder.
pub struct EspMdnsResponder {
    mdns: EspMdns,
}

impl EspMdnsResponder {
    pub fn new() -> Result<Self, MdnsError> {
        let mdns = EspMdns::take().map_err(|e| MdnsError::Driver(format!("{:?}", e)))?;
        Ok(Self { mdns })
    }
}

impl Mdns for EspMdnsResponder {
    fn set_hostname(&mut self, hostname: &str) -> Result<(), MdnsError> {
        self.mdns
            .set_hostname(hostname)
            .map_err(|e| MdnsError::Driver(format!("{:?}", e)))
    }

    fn add_http_service(&mut self, port: u16) -> Result<(), MdnsError> {
        self.mdns
            .add_service(None, "_http", "_tcp", port, &[])
            .map_err(|e| MdnsError::Driver(format!("{:?}", e)))
    }
}
