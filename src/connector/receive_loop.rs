use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::connector::registry::{DataRefCallback, DataRefRegistry};
use crate::messaging::frames::{FrameTag, ValueResponse};
use crate::messaging::transport::Transport;

pub type RawReceiveCallback = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

/// Connector-wide hooks into the receive path, independent of any single subscription
#[derive(Default)]
pub struct ReceiveObservers {
    on_dataref_received: Mutex<Vec<DataRefCallback>>,
    on_raw_receive: Mutex<Vec<RawReceiveCallback>>,
    last_receive: Mutex<Option<Instant>>,
}

impl Debug for ReceiveObservers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReceiveObservers{{last_receive:{:?}}}", *self.last_receive.lock())
    }
}

impl ReceiveObservers {
    pub fn add_dataref_received(&self, callback: DataRefCallback) {
        self.on_dataref_received.lock().push(callback);
    }

    pub fn add_raw_receive(&self, callback: RawReceiveCallback) {
        self.on_raw_receive.lock().push(callback);
    }

    pub fn last_receive(&self) -> Option<Instant> {
        *self.last_receive.lock()
    }
}


/// Processes a single received datagram. Value pairs are applied in wire order, and a pair
///  that can not be applied is logged and skipped without affecting the rest of the datagram.
pub fn handle_datagram(registry: &DataRefRegistry, observers: &ReceiveObservers, datagram: &[u8], from: SocketAddr) {
    *observers.last_receive.lock() = Some(Instant::now());

    let raw_callbacks = observers.on_raw_receive.lock().clone();
    for callback in raw_callbacks {
        callback(datagram, from);
    }

    match FrameTag::peek(datagram) {
        Some(FrameTag::RREF) => {}
        Some(tag) => {
            trace!(?tag, ?from, "ignoring frame");
            return;
        }
        None => {
            trace!(?from, len = datagram.len(), "ignoring datagram without frame tag");
            return;
        }
    }

    let response = match ValueResponse::try_deser(datagram) {
        Ok(response) => response,
        Err(e) => {
            warn!(?from, "dropping value response: {}", e);
            return;
        }
    };

    let dataref_callbacks = observers.on_dataref_received.lock().clone();
    for (id, value) in response.values {
        match registry.update(id, value) {
            Ok(snapshot) => {
                for callback in &dataref_callbacks {
                    callback(&snapshot);
                }
            }
            Err(e) => {
                // typically a late response for a dataref that was just unsubscribed
                debug!(id, value, "dropping dataref update: {}", e);
            }
        }
    }
}

/// Reads datagrams until cancelled. A failing socket terminates the loop with an error.
pub async fn run_receive_loop(
    transport: Arc<dyn Transport>,
    registry: Arc<DataRefRegistry>,
    observers: Arc<ReceiveObservers>,
    max_datagram_size: usize,
    mut cancel_receiver: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; max_datagram_size];

    trace!("starting receive loop");

    loop {
        tokio::select! {
            r = transport.recv_from(&mut buf) => {
                match r {
                    Ok((len, from)) => {
                        handle_datagram(&registry, &observers, &buf[..len], from);
                    }
                    Err(e) => {
                        error!(error = ?e, "error receiving from datagram socket");
                        return Err(e);
                    }
                }
            }
            _ = cancel_receiver.recv() => break,
        }
    }

    debug!("receive loop terminated");
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use rstest::rstest;
    use tokio::time;
    use crate::connector::registry::DataRefSnapshot;
    use crate::messaging::transport::MockTransport;
    use crate::test_util::transport::{xplane_addr, TrackingTransport};
    use super::*;

    fn recording_registry() -> (Arc<DataRefRegistry>, Arc<Mutex<Vec<(i32, f32)>>>, Vec<i32>) {
        let registry = Arc::new(DataRefRegistry::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let ids = ["sim/a", "sim/b"].iter()
            .map(|path| {
                let received = received.clone();
                registry.register_scalar(path, 1, Arc::new(move |s: &DataRefSnapshot| received.lock().push((s.id, s.value)))).unwrap().0
            })
            .collect();
        (registry, received, ids)
    }

    #[test]
    fn test_pairs_in_wire_order() {
        let (registry, received, ids) = recording_registry();
        let observers = ReceiveObservers::default();

        let datagram = ValueResponse::ser(&[(ids[1], 2.0), (ids[0], 1.0), (ids[1], 3.0)]);
        handle_datagram(&registry, &observers, &datagram, xplane_addr());

        assert_eq!(*received.lock(), vec![(ids[1], 2.0), (ids[0], 1.0), (ids[1], 3.0)]);
        assert!(observers.last_receive().is_some());
    }

    #[test]
    fn test_unknown_id_is_skipped() {
        let (registry, received, ids) = recording_registry();
        let observers = ReceiveObservers::default();

        let datagram = ValueResponse::ser(&[(ids[0], 1.0), (-1, 99.0), (ids[1], 2.0)]);
        handle_datagram(&registry, &observers, &datagram, xplane_addr());

        assert_eq!(*received.lock(), vec![(ids[0], 1.0), (ids[1], 2.0)]);
    }

    #[rstest]
    #[case::too_short(b"RRE".to_vec())]
    #[case::unknown_tag(b"XYZW\0\x01\0\0\0\0\0\x80\x3f".to_vec())]
    #[case::other_frame(b"CMND\0sim/none\0".to_vec())]
    #[case::truncated_pair(b"RREF\0\x01\0\0\0\0\0".to_vec())]
    fn test_ignored_datagrams(#[case] datagram: Vec<u8>) {
        let (registry, received, _) = recording_registry();
        let observers = ReceiveObservers::default();
        let raw_count = Arc::new(AtomicUsize::new(0));
        {
            let raw_count = raw_count.clone();
            observers.add_raw_receive(Arc::new(move |_: &[u8], _: SocketAddr| { raw_count.fetch_add(1, Ordering::SeqCst); }));
        }

        handle_datagram(&registry, &observers, &datagram, xplane_addr());

        assert!(received.lock().is_empty());
        assert_eq!(raw_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dataref_received_observer() {
        let (registry, _, ids) = recording_registry();
        let observers = ReceiveObservers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            observers.add_dataref_received(Arc::new(move |s: &DataRefSnapshot| seen.lock().push(s.path.to_string())));
        }

        // the observer sees every known pair, including unchanged values
        let datagram = ValueResponse::ser(&[(ids[0], 1.0), (ids[0], 1.0), (-5, 1.0)]);
        handle_datagram(&registry, &observers, &datagram, xplane_addr());

        assert_eq!(*seen.lock(), vec!["sim/a".to_string(), "sim/a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_dispatches_until_cancelled() {
        let (registry, received, ids) = recording_registry();
        let transport = Arc::new(TrackingTransport::new());
        let (cancel_sender, _) = broadcast::channel(1);

        let handle = tokio::spawn(run_receive_loop(transport.clone(), registry, Default::default(), 1024, cancel_sender.subscribe()));

        transport.inject_datagram(xplane_addr(), &ValueResponse::ser(&[(ids[0], 5.0)]));
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*received.lock(), vec![(ids[0], 5.0)]);

        cancel_sender.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_loop_surfaces_socket_failure() {
        let mut transport = MockTransport::new();
        transport.expect_recv_from()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("socket closed")));

        let (cancel_sender, _) = broadcast::channel(1);
        let result = run_receive_loop(Arc::new(transport), Arc::new(DataRefRegistry::new()), Default::default(), 1024, cancel_sender.subscribe()).await;

        assert_eq!(result.unwrap_err().to_string(), "socket closed");
    }
}
