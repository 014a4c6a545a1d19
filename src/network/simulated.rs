//! In-process network driver that associates after a fixed latency.
//!
//! Used for bench runs without a radio and throughout the tests. The driver
//! is a cheap handle over shared state, so a test can keep a clone and
//! inject drops while the manager owns the other one.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use super::driver::{DriverEvent, NetworkDriver};
use crate::error::{Error, Result};

const STATION_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42));
const ACCESS_POINT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1));

#[derive(Debug)]
struct SimState {
    latency: Duration,
    pending_since: Option<Instant>,
    associated: bool,
    access_point: bool,
    unreachable: bool,
    fail_init: bool,
    events: VecDeque<DriverEvent>,
    begin_calls: u32,
    last_ssid: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SimulatedDriver {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedDriver {
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                latency,
                pending_since: None,
                associated: false,
                access_point: false,
                unreachable: false,
                fail_init: false,
                events: VecDeque::new(),
                begin_calls: 0,
                last_ssid: None,
            })),
        }
    }

    /// Association attempts never complete while set.
    #[cfg(test)]
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.borrow_mut().unreachable = unreachable;
    }

    #[cfg(test)]
    pub fn set_fail_init(&self, fail: bool) {
        self.state.borrow_mut().fail_init = fail;
    }

    /// Simulate the radio dropping the link.
    #[cfg(test)]
    pub fn inject_disconnect(&self, reason: &str) {
        let mut state = self.state.borrow_mut();
        state.associated = false;
        state.pending_since = None;
        state.events.push_back(DriverEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Number of `begin`/`reconnect` calls so far.
    #[cfg(test)]
    pub fn begin_calls(&self) -> u32 {
        self.state.borrow().begin_calls
    }

    #[cfg(test)]
    pub fn last_ssid(&self) -> Option<String> {
        self.state.borrow().last_ssid.clone()
    }

    fn start_association(&self) {
        let mut state = self.state.borrow_mut();
        state.begin_calls += 1;
        state.associated = false;
        state.pending_since = Some(Instant::now());
        tracing::debug!(
            attempt = state.begin_calls,
            ssid = ?state.last_ssid,
            latency = ?state.latency,
            "Simulated association started"
        );
    }
}

impl NetworkDriver for SimulatedDriver {
    fn init(&mut self) -> Result<()> {
        if self.state.borrow().fail_init {
            return Err(Error::NetworkDriver("radio did not respond".into()));
        }
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _secret: &str) -> Result<()> {
        self.state.borrow_mut().last_ssid = Some(ssid.to_string());
        self.start_association();
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        self.start_association();
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.associated = false;
        state.pending_since = None;
        state.events.clear();
    }

    fn start_access_point(&mut self, _name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.associated = false;
        state.pending_since = None;
        state.access_point = true;
        Ok(())
    }

    fn stop_access_point(&mut self) {
        self.state.borrow_mut().access_point = false;
    }

    fn poll_event(&mut self) -> Option<DriverEvent> {
        let mut state = self.state.borrow_mut();
        if let Some(since) = state.pending_since {
            if !state.unreachable && since.elapsed() >= state.latency {
                state.pending_since = None;
                state.associated = true;
                state.events.push_back(DriverEvent::Connected);
                state.events.push_back(DriverEvent::GotAddress(STATION_ADDRESS));
            }
        }
        state.events.pop_front()
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.state.borrow().associated.then_some(STATION_ADDRESS)
    }

    fn access_point_address(&self) -> Option<IpAddr> {
        self.state.borrow().access_point.then_some(ACCESS_POINT_ADDRESS)
    }

    fn signal_strength(&self) -> Option<i32> {
        self.state.borrow().associated.then_some(-55)
    }
}
