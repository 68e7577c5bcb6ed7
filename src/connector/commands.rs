use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace};

use crate::messaging::frames::Frame;
use crate::messaging::transport::Transport;

/// Fire-and-forget sends: value sets, commands and the simulator control frames. None of
///  these is acknowledged by the simulator.
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    xplane_addr: SocketAddr,
    repeat_interval: Duration,
}

impl Debug for CommandDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandDispatcher{{xplane_addr:{:?},repeat_interval:{:?}}}", self.xplane_addr, self.repeat_interval)
    }
}

impl CommandDispatcher {
    pub fn new(transport: Arc<dyn Transport>, xplane_addr: SocketAddr, repeat_interval: Duration) -> CommandDispatcher {
        CommandDispatcher {
            transport,
            xplane_addr,
            repeat_interval,
        }
    }

    pub async fn send_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        let buf = frame.ser()?;
        trace!(tag = ?frame.tag(), len = buf.len(), "sending frame");
        self.transport.send_to(&buf, self.xplane_addr).await
    }

    pub async fn set_dataref_value(&self, path: &str, value: f32) -> anyhow::Result<()> {
        debug!(path, value, "setting dataref");
        self.send_frame(&Frame::SetDataRef { path: path.to_string(), value }).await
    }

    pub async fn set_dataref_string(&self, path: &str, value: &str) -> anyhow::Result<()> {
        debug!(path, value, "setting string dataref");
        self.send_frame(&Frame::SetDataRefString { path: path.to_string(), value: value.to_string() }).await
    }

    pub async fn send_command(&self, command: &str) -> anyhow::Result<()> {
        debug!(command, "sending command");
        self.send_frame(&Frame::Command { command: command.to_string() }).await
    }

    /// Sends the command repeatedly until the returned handle is stopped (or dropped), which
    ///  is how the simulator expects 'press and hold' commands. The first send happens
    ///  immediately, subsequent ones are paced by the configured repeat interval.
    pub fn start_command(&self, command: &str) -> anyhow::Result<CommandHandle> {
        let frame = Frame::Command { command: command.to_string() };
        let buf = frame.ser()?;

        let (cancel_sender, mut cancel_receiver) = broadcast::channel(1);
        let transport = self.transport.clone();
        let xplane_addr = self.xplane_addr;
        let repeat_interval = self.repeat_interval;
        let command = command.to_string();

        info!(command = %command, "starting continuous command");

        let join_handle = {
            let command = command.clone();
            tokio::spawn(async move {
                let mut ticks = interval(repeat_interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut num_sent: u64 = 0;

                loop {
                    tokio::select! {
                        _ = ticks.tick() => {
                            if let Err(e) = transport.send_to(&buf, xplane_addr).await {
                                error!(command = %command, error = ?e, "error sending continuous command - stopping");
                                break;
                            }
                            num_sent += 1;
                        }
                        _ = cancel_receiver.recv() => break,
                    }
                }
                debug!(command = %command, num_sent, "continuous command terminated");
            })
        };

        Ok(CommandHandle {
            command,
            cancel_sender,
            join_handle,
        })
    }

    /// Stops a continuous command, waiting until its last send completed
    pub async fn stop_command(&self, mut handle: CommandHandle) {
        info!(command = %handle.command, "stopping continuous command");
        let _ = handle.cancel_sender.send(());
        if let Err(e) = (&mut handle.join_handle).await {
            error!(error = ?e, "continuous command task failed");
        }
    }

    pub async fn quit_xplane(&self) -> anyhow::Result<()> {
        info!("requesting the simulator to quit");
        self.send_frame(&Frame::Quit).await
    }

    pub async fn fail(&self, system: i32) -> anyhow::Result<()> {
        debug!(system, "failing system");
        self.send_frame(&Frame::Fail { system }).await
    }

    pub async fn recover(&self, system: i32) -> anyhow::Result<()> {
        debug!(system, "recovering system");
        self.send_frame(&Frame::Recover { system }).await
    }
}


/// A running continuous command. Dropping the handle stops the command as well, but without
///  waiting for the sending task to finish.
pub struct CommandHandle {
    command: String,
    cancel_sender: broadcast::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl Debug for CommandHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandHandle{{command:{:?}}}", self.command)
    }
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        let _ = self.cancel_sender.send(());
    }
}
