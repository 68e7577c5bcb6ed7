use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::connector::registry::DataRefRegistry;
use crate::messaging::frames::DataRefRequest;
use crate::messaging::transport::Transport;

/// Sends requests for all subscriptions that are not currently active. Returns the number of
///  requests that were sent.
///
/// This is the only place where subscriptions are ever requested: a new subscription is picked
///  up by the next tick, and one that went silent (simulator restart, lost datagrams) is
///  requested again without the caller noticing.
pub async fn resubscribe_stale(transport: &dyn Transport, registry: &DataRefRegistry, xplane_addr: SocketAddr, max_age: Duration) -> anyhow::Result<usize> {
    let mut requests: Vec<DataRefRequest> = Vec::new();
    registry.for_each_stale(max_age, |request| requests.push(request));

    let mut num_sent = 0;
    for request in &requests {
        trace!(id = request.id, path = %request.path, frequency = request.frequency, "requesting dataref");
        let mut buf = BytesMut::new();
        if let Err(e) = request.ser(&mut buf) {
            // paths are checked on registration, so this is a bug
            warn!(path = %request.path, "can not request dataref: {}", e);
            continue;
        }
        transport.send_to(&buf, xplane_addr).await?;
        num_sent += 1;
    }

    if num_sent > 0 {
        debug!(num_sent, "requested stale datarefs");
    }
    Ok(num_sent)
}

pub async fn run_resubscription_loop(
    transport: Arc<dyn Transport>,
    registry: Arc<DataRefRegistry>,
    xplane_addr: SocketAddr,
    resubscribe_interval: Duration,
    max_age: Duration,
    mut cancel_receiver: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut ticks = interval(resubscribe_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    trace!("starting resubscription loop");

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                resubscribe_stale(transport.as_ref(), &registry, xplane_addr, max_age).await?;
            }
            _ = cancel_receiver.recv() => break,
        }
    }

    debug!("resubscription loop terminated");
    Ok(())
}
