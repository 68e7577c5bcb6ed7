use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::connector::commands::{CommandDispatcher, CommandHandle};
use crate::connector::connector_config::ConnectorConfig;
use crate::connector::elements::{DataRefElement, StringDataRefElement};
use crate::connector::receive_loop::{run_receive_loop, ReceiveObservers};
use crate::connector::registry::{DataRefRegistry, DataRefSnapshot, SubscriptionHandle, SubscriptionState};
use crate::connector::resubscription::run_resubscription_loop;
use crate::connector::string_reassembly::StringSnapshot;
use crate::error::XPlaneError;
use crate::messaging::frames::DataRefRequest;
use crate::messaging::transport::{Transport, UdpTransport};

/// A connection to one simulator instance.
///
/// Subscriptions can be registered at any time, whether the connector is running or not:
///  they are requested from the simulator by the resubscription loop once [XPlaneConnector::start]
///  is running. Value sets and commands are sent immediately.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use xplane_connector::connector::connector::XPlaneConnector;
/// # use xplane_connector::connector::connector_config::ConnectorConfig;
/// # async fn example() -> anyhow::Result<()> {
/// let connector = Arc::new(XPlaneConnector::new(ConnectorConfig::default()).await?);
/// connector.subscribe("sim/cockpit2/gauges/indicators/airspeed_kts_pilot", 5, |s| {
///     println!("airspeed: {}", s.value);
/// })?;
///
/// let c2 = connector.clone();
/// let running = tokio::spawn(async move { c2.start().await });
/// tokio::time::sleep(Duration::from_secs(10)).await;
/// connector.stop(Duration::from_secs(5)).await?;
/// running.await??;
/// # Ok(())
/// # }
/// ```
pub struct XPlaneConnector {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn Transport>,
    registry: Arc<DataRefRegistry>,
    observers: Arc<ReceiveObservers>,
    dispatcher: CommandDispatcher,
    cancel_sender: broadcast::Sender<()>,
    running: watch::Sender<bool>,
}

impl Debug for XPlaneConnector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "XPlaneConnector{{xplane_addr:{:?},running:{},registry:{:?}}}", self.config.xplane_addr, self.is_running(), self.registry)
    }
}

impl XPlaneConnector {
    /// Binds a UDP socket to the configured local address
    pub async fn new(config: ConnectorConfig) -> anyhow::Result<XPlaneConnector> {
        config.validate()?;
        let transport = UdpTransport::bind(config.bind_addr).await?;
        XPlaneConnector::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ConnectorConfig, transport: Arc<dyn Transport>) -> anyhow::Result<XPlaneConnector> {
        config.validate()?;

        let (cancel_sender, _) = broadcast::channel(1);
        let (running, _) = watch::channel(false);
        let dispatcher = CommandDispatcher::new(transport.clone(), config.xplane_addr, config.command_repeat_interval);

        Ok(XPlaneConnector {
            config: Arc::new(config),
            transport,
            registry: Arc::new(DataRefRegistry::new()),
            observers: Default::default(),
            dispatcher,
            cancel_sender,
            running,
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Runs the receive loop and the resubscription loop until [XPlaneConnector::stop] is
    ///  called or the socket fails.
    pub async fn start(&self) -> anyhow::Result<()> {
        // subscribe before flagging 'running' so that a concurrent stop() can not be missed
        let recv_cancel = self.cancel_sender.subscribe();
        let resubscribe_cancel = self.cancel_sender.subscribe();

        let was_started = self.running.send_if_modified(|running| {
            if *running {
                false
            }
            else {
                *running = true;
                true
            }
        });
        if !was_started {
            return Err(XPlaneError::AlreadyRunning.into());
        }

        info!(xplane_addr = ?self.config.xplane_addr, "starting connector");

        let result = tokio::try_join!(
            run_receive_loop(
                self.transport.clone(),
                self.registry.clone(),
                self.observers.clone(),
                self.config.max_datagram_size,
                recv_cancel,
            ),
            run_resubscription_loop(
                self.transport.clone(),
                self.registry.clone(),
                self.config.xplane_addr,
                self.config.resubscribe_interval,
                self.config.max_dataref_age,
                resubscribe_cancel,
            ),
        );

        self.running.send_replace(false);
        match &result {
            Ok(_) => info!("connector stopped"),
            Err(e) => warn!("connector terminated: {}", e),
        }
        result.map(|_| ())
    }

    /// Unsubscribes everything and terminates the background loops. Fails with
    ///  [XPlaneError::ShutdownTimeout] if the loops did not terminate within `timeout`: that
    ///  means a task is stuck on the socket, and retrying will not help.
    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        if !self.is_running() {
            return Err(XPlaneError::NotRunning.into());
        }
        info!("stopping connector");

        let deadline = Instant::now() + timeout;

        let requests = self.registry.unregister_all();
        if time::timeout_at(deadline, self.send_requests(&requests)).await.is_err() {
            warn!(num_requests = requests.len(), "timeout sending unsubscribe requests");
        }

        let _ = self.cancel_sender.send(());

        let mut running = self.running.subscribe();
        let result = match time::timeout_at(deadline, running.wait_for(|running| !*running)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(XPlaneError::ShutdownTimeout(timeout).into()),
        };
        result
    }

    /// Sends requests, logging failures instead of returning them
    /// Sends all requests, even if some of them fail. Returns the first failure.
    async fn send_requests(&self, requests: &[DataRefRequest]) -> anyhow::Result<()> {
        let mut first_error = None;
        for request in requests {
            let mut buf = BytesMut::new();
            let result = match request.ser(&mut buf) {
                Ok(_) => self.transport.send_to(&buf, self.config.xplane_addr).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(id = request.id, path = %request.path, "error sending dataref request: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Subscribes to a numeric dataref. `on_change` is called on the receive loop's task
    ///  whenever the simulator reports a value different from the previous one.
    pub fn subscribe(&self, path: &str, frequency: i32, on_change: impl Fn(&DataRefSnapshot) + Send + Sync + 'static) -> anyhow::Result<SubscriptionHandle> {
        let (_, handle) = self.registry.register_scalar(path, frequency, Arc::new(on_change))?;
        Ok(handle)
    }

    /// Subscribes to a string dataref of `buffer_size` characters, streamed by the simulator
    ///  as one dataref per character
    pub fn subscribe_string(&self, path: &str, frequency: i32, buffer_size: usize, on_change: impl Fn(&StringSnapshot) + Send + Sync + 'static) -> anyhow::Result<SubscriptionHandle> {
        self.registry.register_string(path, frequency, buffer_size, self.config.string_age_threshold, Arc::new(on_change))
    }

    /// `frequency` overrides the element's default frequency
    pub fn subscribe_element(&self, element: &DataRefElement, frequency: Option<i32>, on_change: impl Fn(&DataRefSnapshot) + Send + Sync + 'static) -> anyhow::Result<SubscriptionHandle> {
        self.subscribe(&element.path, frequency.unwrap_or(element.frequency), on_change)
    }

    pub fn subscribe_string_element(&self, element: &StringDataRefElement, frequency: Option<i32>, on_change: impl Fn(&StringSnapshot) + Send + Sync + 'static) -> anyhow::Result<SubscriptionHandle> {
        self.subscribe_string(&element.path, frequency.unwrap_or(element.frequency), element.buffer_size, on_change)
    }

    /// Removes the subscription that `handle` was returned for, or all subscriptions for
    ///  `path` if there is no handle, and tells the simulator to stop streaming them.
    pub async fn unsubscribe(&self, path: &str, handle: Option<SubscriptionHandle>) -> anyhow::Result<()> {
        let requests = self.registry.unregister(path, handle)?;
        debug!(path, num_requests = requests.len(), "unsubscribing");
        self.send_requests(&requests).await
    }

    /// Called for every received update of a subscribed dataref, whether its value changed
    ///  or not. Character updates of string datarefs are included.
    pub fn on_dataref_received(&self, callback: impl Fn(&DataRefSnapshot) + Send + Sync + 'static) {
        self.observers.add_dataref_received(Arc::new(callback));
    }

    /// Called with every received datagram before it is decoded
    pub fn on_raw_receive(&self, callback: impl Fn(&[u8], SocketAddr) + Send + Sync + 'static) {
        self.observers.add_raw_receive(Arc::new(callback));
    }

    pub fn last_receive(&self) -> Option<Instant> {
        self.observers.last_receive()
    }

    /// The ids under which datarefs with exactly this path are currently registered
    pub fn subscription_ids(&self, path: &str) -> Vec<i32> {
        self.registry.ids_for_path(path)
    }

    pub fn subscription_state(&self, id: i32) -> Option<SubscriptionState> {
        self.registry.subscription_state(id, self.config.max_dataref_age)
    }

    pub fn snapshots(&self) -> Vec<DataRefSnapshot> {
        self.registry.snapshots()
    }

    pub async fn set_dataref_value(&self, path: &str, value: f32) -> anyhow::Result<()> {
        self.dispatcher.set_dataref_value(path, value).await
    }

    pub async fn set_element_value(&self, element: &DataRefElement, value: f32) -> anyhow::Result<()> {
        self.dispatcher.set_dataref_value(&element.path, value).await
    }

    pub async fn set_dataref_string(&self, path: &str, value: &str) -> anyhow::Result<()> {
        self.dispatcher.set_dataref_string(path, value).await
    }

    pub async fn send_command(&self, command: impl AsRef<str>) -> anyhow::Result<()> {
        self.dispatcher.send_command(command.as_ref()).await
    }

    pub fn start_command(&self, command: impl AsRef<str>) -> anyhow::Result<CommandHandle> {
        self.dispatcher.start_command(command.as_ref())
    }

    pub async fn stop_command(&self, handle: CommandHandle) {
        self.dispatcher.stop_command(handle).await
    }

    pub async fn quit_xplane(&self) -> anyhow::Result<()> {
        self.dispatcher.quit_xplane().await
    }

    pub async fn fail(&self, system: i32) -> anyhow::Result<()> {
        self.dispatcher.fail(system).await
    }

    pub async fn recover(&self, system: i32) -> anyhow::Result<()> {
        self.dispatcher.recover(system).await
    }
}
