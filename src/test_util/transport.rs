use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::messaging::frames::DataRefRequest;
use crate::messaging::transport::Transport;

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn xplane_addr() -> SocketAddr {
    test_addr(49000)
}

/// A fake [Transport] that records everything that is sent, and that 'receives' whatever
///  the test injects.
#[derive(Debug)]
pub struct TrackingTransport {
    sent: RwLock<Vec<(SocketAddr, Vec<u8>)>>,
    inject: mpsc::UnboundedSender<anyhow::Result<(Vec<u8>, SocketAddr)>>,
    received: Mutex<mpsc::UnboundedReceiver<anyhow::Result<(Vec<u8>, SocketAddr)>>>,
}

impl TrackingTransport {
    pub fn new() -> TrackingTransport {
        let (inject, received) = mpsc::unbounded_channel();
        TrackingTransport {
            sent: Default::default(),
            inject,
            received: Mutex::new(received),
        }
    }

    pub fn inject_datagram(&self, from: SocketAddr, datagram: &[u8]) {
        self.inject.send(Ok((datagram.to_vec(), from))).unwrap();
    }

    pub fn inject_error(&self, msg: &'static str) {
        self.inject.send(Err(anyhow::anyhow!(msg))).unwrap();
    }

    pub async fn assert_datagram_sent(&self, to: SocketAddr, expected: &[u8]) {
        let mut lock = self.sent.write().await;
        if lock.is_empty() {
            panic!("no datagram was sent");
        }
        let (actual_to, actual) = lock.remove(0);
        assert_eq!(actual_to, to);
        assert_eq!(actual.as_slice(), expected);
    }

    /// removes all datagrams sent so far and decodes them as `RREF` requests
    pub async fn take_requests(&self) -> Vec<(SocketAddr, DataRefRequest)> {
        self.sent.write().await
            .drain(..)
            .map(|(to, buf)| (to, DataRefRequest::try_deser(&mut buf.as_slice()).unwrap()))
            .collect()
    }

    pub async fn take_datagrams(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.write().await
            .drain(..)
            .collect()
    }

    pub async fn num_sent(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn assert_no_remaining_datagrams(&self) {
        let lock = self.sent.read().await;
        assert!(lock.is_empty(), "unexpected datagrams: {:?}", lock);
    }
}

#[async_trait]
impl Transport for TrackingTransport {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        self.sent.write().await.push((to, buf.to_vec()));
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let next = self.received.lock().await
            .recv().await;
        match next {
            Some(Ok((datagram, from))) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, from))
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}
