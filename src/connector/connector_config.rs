use std::net::SocketAddr;
use std::time::Duration;

use crate::error::XPlaneError;

pub const DEFAULT_XPLANE_PORT: u16 = 49000;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// The simulator's UDP endpoint: all requests, value sets and commands go here
    pub xplane_addr: SocketAddr,
    /// The local address that the connector's socket is bound to. The simulator streams
    ///  values back to wherever the request came from, so an ephemeral port is fine.
    pub bind_addr: SocketAddr,

    /// interval at which the registry is scanned for subscriptions that need (re-)requesting
    pub resubscribe_interval: Duration,
    /// A subscription that received no value for longer than this is requested again. This
    ///  is how subscriptions are initially activated, and how they recover after the simulator
    ///  restarted or datagrams were dropped.
    pub max_dataref_age: Duration,
    /// A partially received string that is older than this is discarded
    pub string_age_threshold: Duration,
    /// pause between two sends of a continuously repeated command
    pub command_repeat_interval: Duration,

    pub max_datagram_size: usize,
}

impl ConnectorConfig {
    pub fn new(xplane_addr: SocketAddr) -> ConnectorConfig {
        ConnectorConfig {
            xplane_addr,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            resubscribe_interval: Duration::from_secs(1),
            max_dataref_age: Duration::from_secs(5),
            string_age_threshold: Duration::from_secs(5),
            command_repeat_interval: Duration::from_millis(10),
            max_datagram_size: 65536,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resubscribe_interval.is_zero() {
            return Err(XPlaneError::invalid_argument("resubscribe interval must be positive").into());
        }
        if self.command_repeat_interval.is_zero() {
            return Err(XPlaneError::invalid_argument("command repeat interval must be positive").into());
        }
        if self.max_datagram_size < 16 {
            return Err(XPlaneError::invalid_argument("max datagram size is too small").into());
        }
        Ok(())
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_XPLANE_PORT)))
    }
}
