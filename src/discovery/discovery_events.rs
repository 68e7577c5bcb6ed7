use tokio::sync::broadcast;
use tracing::trace;

use crate::discovery::discovery::DiscoveredInstance;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryEvent {
    /// The first beacon from an address that was not (or no longer) known
    InstanceDiscovered(DiscoveredInstance),
    /// An instance was removed because it stopped sending beacons
    InstanceInactive(DiscoveredInstance),
}

pub struct DiscoveryEventNotifier {
    sender: broadcast::Sender<DiscoveryEvent>,
}
impl DiscoveryEventNotifier {
    pub fn new() -> DiscoveryEventNotifier {
        let (sender, _) = broadcast::channel(128);

        DiscoveryEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: DiscoveryEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
