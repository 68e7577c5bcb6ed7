use std::fmt::Debug;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, trace};

/// This trait decouples the protocol engine from the actual socket, so that the receive
///  loop, the scheduler and discovery can be driven by a fake in tests.
///
/// Implementations must allow concurrent `send_to` calls from several tasks while one task
///  is blocked in `recv_from`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<()>;

    /// Waits for the next datagram, returning its length and sender
    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;
}


#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await
            .with_context(|| format!("binding UDP socket to {}", addr))?;
        info!("bound UDP socket to {:?}", socket.local_addr()?);
        Ok(UdpTransport { socket })
    }

    /// Binds to the given port on all interfaces with address reuse enabled and joins the multicast group.
    pub fn bind_multicast(group: Ipv4Addr, port: u16) -> anyhow::Result<UdpTransport> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&bind_addr.into())
            .with_context(|| format!("binding multicast socket to {}", bind_addr))?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("joining multicast group {}", group))?;

        let socket = UdpSocket::from_std(socket.into())?;
        info!("listening for multicast group {} on port {}", group, port);
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        trace!(?to, len = buf.len(), "sending datagram");
        self.socket.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }
}
