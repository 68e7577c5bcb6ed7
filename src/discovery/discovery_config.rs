use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::XPlaneError;

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 1, 1);
pub const DEFAULT_BEACON_PORT: u16 = 49707;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    /// An instance that did not send a beacon for longer than this is considered inactive.
    ///  This is also the interval at which inactive instances are looked for, so an instance
    ///  may stay in the list for up to twice this long after its last beacon.
    pub sweep_interval: Duration,
}

impl DiscoveryConfig {
    pub fn new() -> DiscoveryConfig {
        DiscoveryConfig {
            multicast_group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_BEACON_PORT,
            sweep_interval: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multicast_group.is_multicast() {
            return Err(XPlaneError::invalid_argument(format!("{} is not a multicast address", self.multicast_group)).into());
        }
        if self.sweep_interval.is_zero() {
            return Err(XPlaneError::invalid_argument("sweep interval must be positive").into());
        }
        Ok(())
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig::new()
    }
}
