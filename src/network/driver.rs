//! Connectivity driver interface

use std::net::IpAddr;

use crate::error::Result;

/// Notifications a driver raises between ticks. They are drained by
/// [`super::ConnectivityManager::update`], never delivered re-entrantly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    /// Associated with the access point, no address yet.
    Connected,
    GotAddress(IpAddr),
    Disconnected { reason: String },
    LostAddress,
}

/// Low-level network primitives. Everything here must return promptly;
/// association itself completes asynchronously and is reported through
/// [`NetworkDriver::poll_event`].
pub trait NetworkDriver {
    fn init(&mut self) -> Result<()>;
    fn begin(&mut self, ssid: &str, secret: &str) -> Result<()>;
    fn reconnect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn start_access_point(&mut self, name: &str) -> Result<()>;
    fn stop_access_point(&mut self);
    fn poll_event(&mut self) -> Option<DriverEvent>;
    fn local_address(&self) -> Option<IpAddr>;
    fn access_point_address(&self) -> Option<IpAddr>;
    /// Received signal strength in dBm, if associated.
    fn signal_strength(&self) -> Option<i32>;
}
