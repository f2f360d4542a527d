//! Platform primitives consumed by the connectivity service.
//!
//! Blocking connection attempts run under a hardware watchdog; the service
//! extends the watchdog before the attempt, re-arms it on every poll tick,
//! and restores the original period afterwards. Delay and mDNS are the
//! other two collaborators.

use std::fmt;
use std::time::Duration;

/// Watchdog re-arm capability.
pub trait Watchdog {
    /// Widen the trigger period ahead of a long blocking operation.
    fn extend(&mut self, period: Duration);

    /// Re-arm the watchdog.
    fn feed(&mut self);

    /// Restore the period configured before [`extend`](Self::extend).
    fn restore(&mut self);
}

/// Watchdog that does nothing; for host builds and tests without one.
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn extend(&mut self, _period: Duration) {}
    fn feed(&mut self) {}
    fn restore(&mut self) {}
}

/// Monotonic delay capability.
pub trait DelayProvider {
    fn delay_ms(&mut self, ms: u32);
}

/// Delay via the OS scheduler.
pub struct StdDelay;

impl DelayProvider for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// mDNS discovery registration. Best-effort: callers log failures and
/// carry on.
pub trait Mdns {
    fn set_hostname(&mut self, hostname: &str) -> Result<(), MdnsError>;
    fn add_http_service(&mut self, port: u16) -> Result<(), MdnsError>;
}

/// Errors from the mDNS responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdnsError {
    /// Responder-level failure.
    Driver(String),
}

impl fmt::Display for MdnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(msg) => write!(f, "mDNS error: {}", msg),
        }
    }
}

impl std::error::Error for MdnsError {}
