//! Driver for hosts whose network is managed by the operating system.
//!
//! There is no radio to drive: "associating" means the host has a usable
//! local address. The address is re-checked periodically so a lost link is
//! still reported as a disconnect.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::time::Instant;

use super::driver::{DriverEvent, NetworkDriver};
use crate::error::Result;

const ADDRESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct HostDriver {
    wanted: bool,
    address: Option<IpAddr>,
    access_point: bool,
    last_check: Option<Instant>,
    events: VecDeque<DriverEvent>,
}

impl HostDriver {
    pub fn new() -> Self {
        Self {
            wanted: false,
            address: None,
            access_point: false,
            last_check: None,
            events: VecDeque::new(),
        }
    }

    fn check_address(&mut self) {
        let now = Instant::now();
        if self
            .last_check
            .is_some_and(|at| now.duration_since(at) < ADDRESS_CHECK_INTERVAL)
        {
            return;
        }
        self.last_check = Some(now);

        let current = local_ip_address::local_ip().ok();
        match (self.address, current) {
            (None, Some(ip)) => {
                tracing::debug!(ip = %ip, "Host address available");
                self.events.push_back(DriverEvent::Connected);
                self.events.push_back(DriverEvent::GotAddress(ip));
            }
            (Some(_), None) => {
                tracing::debug!("Host address lost");
                self.events.push_back(DriverEvent::LostAddress);
            }
            (Some(old), Some(ip)) if old != ip => {
                self.events.push_back(DriverEvent::GotAddress(ip));
            }
            _ => {}
        }
        self.address = current;
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkDriver for HostDriver {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _secret: &str) -> Result<()> {
        tracing::info!(ssid, "Host network is managed by the OS, waiting for an address");
        self.wanted = true;
        self.address = None;
        self.last_check = None;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        self.wanted = true;
        self.address = None;
        self.last_check = None;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.wanted = false;
        self.address = None;
        self.events.clear();
    }

    fn start_access_point(&mut self, name: &str) -> Result<()> {
        tracing::warn!(name, "Access point mode is not available on a host build");
        self.wanted = false;
        self.access_point = true;
        Ok(())
    }

    fn stop_access_point(&mut self) {
        self.access_point = false;
    }

    fn poll_event(&mut self) -> Option<DriverEvent> {
        if self.wanted {
            self.check_address();
        }
        self.events.pop_front()
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.address
    }

    fn access_point_address(&self) -> Option<IpAddr> {
        self.access_point
            .then_some(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn signal_strength(&self) -> Option<i32> {
        // Wired or OS-managed links have no RSSI to report
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_links_report_no_signal_strength() {
        let mut driver = HostDriver::new();
        driver.begin("lan", "").unwrap();
        driver.address = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        assert_eq!(driver.local_address(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))));
        assert_eq!(driver.signal_strength(), None);
    }
}
