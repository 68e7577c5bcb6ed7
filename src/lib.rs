//! A client for the X-Plane flight simulator's UDP interface.
//!
//! The simulator streams the values of *datarefs* (named simulator variables like
//!  `sim/cockpit2/gauges/indicators/airspeed_kts_pilot`) to clients that requested them, and
//!  accepts value sets and commands. [connector::connector::XPlaneConnector] keeps a set of
//!  subscriptions alive against one simulator instance, and [discovery::discovery::XPlaneDiscovery]
//!  listens for the multicast beacons by which running instances announce themselves.

pub mod connector;
pub mod discovery;
pub mod error;
pub mod messaging;
pub mod util;

#[cfg(test)] pub mod test_util;
