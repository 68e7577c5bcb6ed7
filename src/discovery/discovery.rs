//! Simulator instances announce themselves with a `BECN` frame on a multicast group, about
//!  once per second. Discovery keeps a list of the instances that were heard from recently.
//!
//! Discovery is independent of any [crate::connector::connector::XPlaneConnector]: it can
//!  run before there is a connector (to find out where to connect to), and stopping a
//!  connector does not affect it.

use std::fmt::{Debug, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

use crate::discovery::discovery_config::DiscoveryConfig;
use crate::discovery::discovery_events::{DiscoveryEvent, DiscoveryEventNotifier};
use crate::messaging::frames::{Beacon, FrameTag};
use crate::messaging::transport::{Transport, UdpTransport};

const BEACON_BUFFER_SIZE: usize = 2048;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredInstance {
    pub addr: IpAddr,
    pub computer_name: String,
    pub major_version: u8,
    pub minor_version: u8,
    pub host_id: u32,
    pub version: u32,
    pub role: u32,
    /// the port the instance listens on for requests
    pub port: u16,
    pub last_seen: Instant,
}

impl DiscoveredInstance {
    fn new(addr: IpAddr, beacon: Beacon, last_seen: Instant) -> DiscoveredInstance {
        DiscoveredInstance {
            addr,
            computer_name: beacon.computer_name,
            major_version: beacon.major_version,
            minor_version: beacon.minor_version,
            host_id: beacon.host_id,
            version: beacon.version,
            role: beacon.role,
            port: beacon.port,
            last_seen,
        }
    }

    /// The address to configure a connector with for talking to this instance
    pub fn xplane_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}


pub struct XPlaneDiscovery {
    config: DiscoveryConfig,
    transport: Arc<dyn Transport>,
    instances: Mutex<FxHashMap<IpAddr, DiscoveredInstance>>,
    event_notifier: DiscoveryEventNotifier,
    cancel_sender: broadcast::Sender<()>,
}

impl Debug for XPlaneDiscovery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "XPlaneDiscovery{{group:{}:{},instances:{}}}", self.config.multicast_group, self.config.port, self.instances.lock().len())
    }
}

impl XPlaneDiscovery {
    /// Joins the configured multicast group
    pub fn new(config: DiscoveryConfig) -> anyhow::Result<XPlaneDiscovery> {
        config.validate()?;
        let transport = UdpTransport::bind_multicast(config.multicast_group, config.port)?;
        XPlaneDiscovery::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: DiscoveryConfig, transport: Arc<dyn Transport>) -> anyhow::Result<XPlaneDiscovery> {
        config.validate()?;
        let (cancel_sender, _) = broadcast::channel(1);

        Ok(XPlaneDiscovery {
            config,
            transport,
            instances: Default::default(),
            event_notifier: DiscoveryEventNotifier::new(),
            cancel_sender,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_notifier.subscribe()
    }

    /// A snapshot of the instances that are currently considered active
    pub fn running_instances(&self) -> FxHashMap<IpAddr, DiscoveredInstance> {
        self.instances.lock().clone()
    }

    /// Receives beacons and periodically removes instances that went silent, until
    ///  [XPlaneDiscovery::stop] is called or the socket fails.
    pub async fn start_beacon_receiver(&self) -> anyhow::Result<()> {
        let mut cancel_receiver = self.cancel_sender.subscribe();
        let mut buf = vec![0u8; BEACON_BUFFER_SIZE];

        let mut sweep_ticks = interval_at(Instant::now() + self.config.sweep_interval, self.config.sweep_interval);
        sweep_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(group = %self.config.multicast_group, port = self.config.port, "starting beacon receiver");

        loop {
            tokio::select! {
                r = self.transport.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            self.on_datagram(&buf[..len], from);
                        }
                        Err(e) => {
                            error!(error = ?e, "error receiving beacons");
                            return Err(e);
                        }
                    }
                }
                _ = sweep_ticks.tick() => {
                    self.remove_inactive_instances();
                }
                _ = cancel_receiver.recv() => break,
            }
        }

        debug!("beacon receiver terminated");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.cancel_sender.send(());
    }

    fn on_datagram(&self, datagram: &[u8], from: SocketAddr) {
        if FrameTag::peek(datagram) != Some(FrameTag::BECN) {
            trace!(?from, "ignoring non-beacon datagram");
            return;
        }

        let beacon = match Beacon::try_deser(datagram) {
            Ok(beacon) => beacon,
            Err(e) => {
                debug!(?from, "dropping malformed beacon: {}", e);
                return;
            }
        };

        let addr = from.ip();
        let now = Instant::now();

        let discovered = {
            let mut instances = self.instances.lock();
            match instances.get_mut(&addr) {
                Some(instance) => {
                    trace!(?addr, "refreshing instance");
                    *instance = DiscoveredInstance::new(addr, beacon, now);
                    None
                }
                None => {
                    let instance = DiscoveredInstance::new(addr, beacon, now);
                    instances.insert(addr, instance.clone());
                    Some(instance)
                }
            }
        };

        if let Some(instance) = discovered {
            info!(?addr, computer_name = %instance.computer_name, version = instance.version, "discovered simulator instance");
            self.event_notifier.send_event(DiscoveryEvent::InstanceDiscovered(instance));
        }
    }

    /// Removes every instance whose last beacon is older than the sweep interval
    fn remove_inactive_instances(&self) {
        let now = Instant::now();
        let removed = {
            let mut instances = self.instances.lock();
            let inactive = instances.values()
                .filter(|i| i.last_seen + self.config.sweep_interval < now)
                .map(|i| i.addr)
                .collect::<Vec<_>>();
            inactive.iter()
                .flat_map(|addr| instances.remove(addr))
                .collect::<Vec<_>>()
        };

        for instance in removed {
            info!(addr = ?instance.addr, computer_name = %instance.computer_name, "simulator instance became inactive");
            self.event_notifier.send_event(DiscoveryEvent::InstanceInactive(instance));
        }
    }
}
