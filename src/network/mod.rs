//! Network connectivity - connection lifecycle and reconnect policy
//!
//! - `driver`: the [`NetworkDriver`] primitives the manager is built on
//! - `host`: driver for OS-managed networking
//! - `simulated`: latency-based stand-in driver
//!
//! [`ConnectivityManager`] publishes `ConnectivityConnected` and
//! `ConnectivityDisconnected` on every transition into or out of
//! `Connected`, and `ConnectivityFailed` when a connect attempt times out or
//! automatic reconnection gives up.

mod driver;
mod host;
mod simulated;

pub use driver::{DriverEvent, NetworkDriver};
pub use host::HostDriver;
pub use simulated::SimulatedDriver;

use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind};

/// Reported when there is no association to measure.
pub const NO_SIGNAL_DBM: i32 = -100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    AccessPointMode,
    Error,
}

pub struct ConnectivityManager {
    driver: Box<dyn NetworkDriver>,
    bus: Rc<EventBus>,
    state: ConnectivityState,
    ssid: String,
    secret: String,
    access_point_name: String,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    max_attempts: u32,
    auto_reconnect: bool,
    connect_started: Option<Instant>,
    last_disconnect: Option<Instant>,
    last_disconnect_reason: Option<String>,
    attempts: u32,
    exhausted_reported: bool,
    address: Option<IpAddr>,
}

impl ConnectivityManager {
    /// Bring up the driver. Failure here means the device has no network
    /// hardware to speak of and is fatal to startup.
    pub fn new(
        config: &NetworkConfig,
        mut driver: Box<dyn NetworkDriver>,
        bus: Rc<EventBus>,
    ) -> Result<Self> {
        driver.init()?;
        tracing::debug!("Network driver initialized");

        Ok(Self {
            driver,
            bus,
            state: ConnectivityState::Disconnected,
            ssid: String::new(),
            secret: String::new(),
            access_point_name: config.access_point_name.clone(),
            connect_timeout: config.connect_timeout(),
            reconnect_interval: config.reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
            auto_reconnect: config.auto_reconnect,
            connect_started: None,
            last_disconnect: None,
            last_disconnect_reason: None,
            attempts: 0,
            exhausted_reported: false,
            address: None,
        })
    }

    /// Join `ssid`. Safe to call in any state: an existing link is dropped
    /// first and the attempt count starts over.
    pub fn connect(&mut self, ssid: &str, secret: &str) -> Result<()> {
        match self.state {
            ConnectivityState::Connected | ConnectivityState::Connecting => {
                tracing::debug!("Dropping current link before connecting");
                self.driver.disconnect();
                self.set_state(ConnectivityState::Disconnected);
            }
            ConnectivityState::AccessPointMode => {
                self.driver.stop_access_point();
                self.set_state(ConnectivityState::Disconnected);
            }
            _ => {}
        }

        self.ssid = ssid.to_string();
        self.secret = secret.to_string();
        self.attempts = 0;
        self.exhausted_reported = false;

        tracing::info!(ssid, "Connecting to network");
        if let Err(e) = self.driver.begin(ssid, secret) {
            self.last_disconnect = Some(Instant::now());
            self.set_state(ConnectivityState::Error);
            return Err(e);
        }
        self.connect_started = Some(Instant::now());
        self.set_state(ConnectivityState::Connecting);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.driver.disconnect();
        // An explicit disconnect is not something to recover from
        self.ssid.clear();
        self.secret.clear();
        self.connect_started = None;
        self.set_state(ConnectivityState::Disconnected);
    }

    /// Drain driver notifications, then apply the timeout and reconnect
    /// policy. Called once per tick.
    pub fn update(&mut self) {
        if self.state == ConnectivityState::AccessPointMode {
            return;
        }

        while let Some(event) = self.driver.poll_event() {
            self.handle_driver_event(event);
        }

        let now = Instant::now();
        match self.state {
            ConnectivityState::Connecting => {
                let timed_out = self
                    .connect_started
                    .is_some_and(|at| now.duration_since(at) >= self.connect_timeout);
                if timed_out {
                    tracing::warn!(ssid = %self.ssid, timeout = ?self.connect_timeout, "Connection timed out");
                    self.driver.disconnect();
                    self.connect_started = None;
                    self.last_disconnect = Some(now);
                    self.last_disconnect_reason = Some("connect timeout".to_string());
                    self.set_state(ConnectivityState::Error);
                    self.report_failure(&Error::ConnectivityTimeout);
                }
            }
            ConnectivityState::Disconnected | ConnectivityState::Error => {
                self.maybe_reconnect(now);
            }
            _ => {}
        }
    }

    fn maybe_reconnect(&mut self, now: Instant) {
        if !self.auto_reconnect || self.ssid.is_empty() {
            return;
        }
        let cooled_down = self
            .last_disconnect
            .is_none_or(|at| now.duration_since(at) >= self.reconnect_interval);
        if !cooled_down {
            return;
        }

        if self.attempts >= self.max_attempts {
            if !self.exhausted_reported {
                self.exhausted_reported = true;
                tracing::error!(attempts = self.attempts, "Giving up on reconnecting");
                self.report_failure(&Error::ConnectivityExhausted {
                    attempts: self.attempts,
                });
            }
            return;
        }

        self.attempts += 1;
        tracing::info!(attempt = self.attempts, max = self.max_attempts, "Reconnecting");
        match self.driver.reconnect() {
            Ok(()) => {
                self.connect_started = Some(now);
                self.set_state(ConnectivityState::Connecting);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconnect request rejected by driver");
                self.last_disconnect = Some(now);
            }
        }
    }

    fn handle_driver_event(&mut self, event: DriverEvent) {
        tracing::trace!(?event, "Driver event");
        match event {
            DriverEvent::Connected => {
                tracing::debug!("Associated, waiting for address");
            }
            DriverEvent::GotAddress(ip) => {
                self.address = Some(ip);
                if self.state != ConnectivityState::Connected {
                    tracing::info!(ip = %ip, ssid = %self.ssid, "Network connected");
                    self.attempts = 0;
                    self.exhausted_reported = false;
                    self.connect_started = None;
                    self.set_state(ConnectivityState::Connected);
                }
            }
            DriverEvent::Disconnected { reason } => self.link_lost(reason),
            DriverEvent::LostAddress => self.link_lost("address lost".to_string()),
        }
    }

    fn link_lost(&mut self, reason: String) {
        self.address = None;
        if self.state == ConnectivityState::Disconnected {
            return;
        }
        tracing::warn!(reason = %reason, "Network disconnected");
        self.last_disconnect = Some(Instant::now());
        self.last_disconnect_reason = Some(reason);
        self.connect_started = None;
        self.set_state(ConnectivityState::Disconnected);
    }

    fn report_failure(&self, error: &Error) {
        self.bus.publish(
            Event::with_int(EventKind::ConnectivityFailed, error.code())
                .and_text(error.to_string())
                .and_data(error.clone()),
        );
    }

    /// Switch to local setup mode. The station link, if any, is dropped.
    pub fn start_access_point(&mut self) -> Result<()> {
        if self.state == ConnectivityState::AccessPointMode {
            return Ok(());
        }
        self.driver.disconnect();
        self.connect_started = None;
        self.driver.start_access_point(&self.access_point_name)?;
        tracing::info!(name = %self.access_point_name, "Access point started");
        self.set_state(ConnectivityState::AccessPointMode);
        Ok(())
    }

    pub fn stop_access_point(&mut self) {
        if self.state != ConnectivityState::AccessPointMode {
            return;
        }
        self.driver.stop_access_point();
        self.last_disconnect = Some(Instant::now());
        tracing::info!("Access point stopped");
        self.set_state(ConnectivityState::Disconnected);
    }

    fn set_state(&mut self, new: ConnectivityState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        tracing::debug!(from = ?old, to = ?new, "Connectivity state changed");

        if new == ConnectivityState::Connected {
            let ip = self.ip_address().to_string();
            self.bus
                .publish(Event::with_text(EventKind::ConnectivityConnected, ip));
        } else if old == ConnectivityState::Connected {
            let mut event = Event::new(EventKind::ConnectivityDisconnected);
            event.text = self.last_disconnect_reason.clone();
            self.bus.publish(event);
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectivityState::Connected
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Station address when connected, the AP address in setup mode,
    /// otherwise `0.0.0.0`.
    pub fn ip_address(&self) -> IpAddr {
        let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        match self.state {
            ConnectivityState::Connected => self
                .address
                .or_else(|| self.driver.local_address())
                .unwrap_or(unspecified),
            ConnectivityState::AccessPointMode => {
                self.driver.access_point_address().unwrap_or(unspecified)
            }
            _ => unspecified,
        }
    }

    pub fn signal_strength(&self) -> i32 {
        if self.is_connected() {
            self.driver.signal_strength().unwrap_or(NO_SIGNAL_DBM)
        } else {
            NO_SIGNAL_DBM
        }
    }

    pub fn last_disconnect_reason(&self) -> Option<&str> {
        self.last_disconnect_reason.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn config(latency_ms: u64) -> NetworkConfig {
        NetworkConfig {
            connect_timeout_secs: 30,
            reconnect_interval_secs: 5,
            max_reconnect_attempts: 3,
            simulated_latency_ms: latency_ms,
            ..NetworkConfig::default()
        }
    }

    fn record(bus: &EventBus) -> Rc<RefCell<Vec<Event>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_all(move |e| {
            sink.borrow_mut().push(e.clone());
            Ok(())
        });
        seen
    }

    fn count(seen: &RefCell<Vec<Event>>, kind: EventKind) -> usize {
        seen.borrow().iter().filter(|e| e.kind == kind).count()
    }

    fn manager(driver: &SimulatedDriver, bus: &Rc<EventBus>) -> ConnectivityManager {
        ConnectivityManager::new(&config(1500), Box::new(driver.clone()), bus.clone()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn connects_after_driver_latency() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(1500));
        let mut net = manager(&driver, &bus);

        let mut states = vec![net.state()];
        net.connect("home", "pw").unwrap();
        states.push(net.state());

        tokio::time::advance(Duration::from_millis(1000)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Connecting);

        tokio::time::advance(Duration::from_millis(500)).await;
        net.update();
        states.push(net.state());
        net.update();

        assert_eq!(
            states,
            vec![
                ConnectivityState::Disconnected,
                ConnectivityState::Connecting,
                ConnectivityState::Connected,
            ]
        );
        assert_eq!(count(&seen, EventKind::ConnectivityConnected), 1);
        assert_eq!(net.ssid(), "home");
        assert_ne!(net.ip_address(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(net.signal_strength() > NO_SIGNAL_DBM);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_moves_to_error_and_reports() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(1500));
        driver.set_unreachable(true);
        let mut net = manager(&driver, &bus);

        net.connect("home", "pw").unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Connecting);

        tokio::time::advance(Duration::from_secs(1)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Error);

        let failures: Vec<Event> = seen
            .borrow()
            .iter()
            .filter(|e| e.kind == EventKind::ConnectivityFailed)
            .cloned()
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].int, Some(Error::ConnectivityTimeout.code()));
        // Never connected, so nothing to report as a disconnect
        assert_eq!(count(&seen, EventKind::ConnectivityDisconnected), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_publishes_disconnect_and_reconnects_after_cooldown() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(100));
        let mut net = manager(&driver, &bus);

        net.connect("home", "pw").unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        net.update();
        assert!(net.is_connected());

        driver.inject_disconnect("beacon timeout");
        net.update();
        assert_eq!(net.state(), ConnectivityState::Disconnected);
        assert_eq!(net.last_disconnect_reason(), Some("beacon timeout"));
        assert_eq!(net.signal_strength(), NO_SIGNAL_DBM);
        assert_eq!(net.ip_address(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(count(&seen, EventKind::ConnectivityDisconnected), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Disconnected);

        tokio::time::advance(Duration::from_secs(1)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Connecting);
        assert_eq!(net.reconnect_attempts(), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        net.update();
        assert!(net.is_connected());
        assert_eq!(net.reconnect_attempts(), 0);
        assert_eq!(count(&seen, EventKind::ConnectivityConnected), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_disconnect_does_not_reconnect() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(100));
        let mut net = manager(&driver, &bus);

        net.connect("home", "pw").unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        net.update();
        assert!(net.is_connected());

        net.disconnect();
        assert_eq!(net.state(), ConnectivityState::Disconnected);
        assert_eq!(net.ssid(), "");
        assert_eq!(count(&seen, EventKind::ConnectivityDisconnected), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Disconnected);
        assert_eq!(driver.begin_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_after_max_attempts() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(100));
        driver.set_unreachable(true);
        let quick = NetworkConfig {
            connect_timeout_secs: 1,
            ..config(100)
        };
        let mut net = ConnectivityManager::new(&quick, Box::new(driver.clone()), bus.clone()).unwrap();

        net.connect("home", "pw").unwrap();
        // Initial attempt plus three retries, each timing out after 1 s with
        // a 5 s cool-down in between
        for _ in 0..40 {
            tokio::time::advance(Duration::from_secs(1)).await;
            net.update();
        }

        assert_eq!(driver.begin_calls(), 4);
        assert_eq!(net.reconnect_attempts(), 3);
        let exhausted = seen
            .borrow()
            .iter()
            .filter(|e| e.int == Some(Error::ConnectivityExhausted { attempts: 3 }.code()))
            .count();
        assert_eq!(exhausted, 1);

        // An explicit connect starts over
        net.connect("home", "pw").unwrap();
        assert_eq!(net.reconnect_attempts(), 0);
        assert_eq!(net.state(), ConnectivityState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connected_drops_link_first() {
        let bus = Rc::new(EventBus::new());
        let seen = record(&bus);
        let driver = SimulatedDriver::new(Duration::from_millis(100));
        let mut net = manager(&driver, &bus);

        net.connect("home", "pw").unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        net.update();

        net.connect("office", "pw2").unwrap();
        assert_eq!(net.state(), ConnectivityState::Connecting);
        assert_eq!(count(&seen, EventKind::ConnectivityDisconnected), 1);
        assert_eq!(driver.last_ssid().as_deref(), Some("office"));
    }

    #[tokio::test(start_paused = true)]
    async fn access_point_mode_suspends_reconnects() {
        let bus = Rc::new(EventBus::new());
        let driver = SimulatedDriver::new(Duration::from_millis(100));
        let mut net = manager(&driver, &bus);

        net.connect("home", "pw").unwrap();
        net.start_access_point().unwrap();
        assert_eq!(net.state(), ConnectivityState::AccessPointMode);
        assert_eq!(net.ip_address(), IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)));

        tokio::time::advance(Duration::from_secs(60)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::AccessPointMode);
        assert_eq!(driver.begin_calls(), 1);

        net.stop_access_point();
        assert_eq!(net.state(), ConnectivityState::Disconnected);
        tokio::time::advance(Duration::from_secs(5)).await;
        net.update();
        assert_eq!(net.state(), ConnectivityState::Connecting);
    }

    #[test]
    fn driver_init_failure_is_reported() {
        let bus = Rc::new(EventBus::new());
        let driver = SimulatedDriver::new(Duration::ZERO);
        driver.set_fail_init(true);
        let err = ConnectivityManager::new(&config(0), Box::new(driver), bus)
            .err()
            .unwrap();
        assert!(matches!(err, Error::NetworkDriver(_)));
    }
}
