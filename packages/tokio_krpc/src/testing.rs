//! Deterministic transport for tests: outbound datagrams are captured,
//! inbound ones are injected by hand.

use crate::transport::PacketTransport;
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    io,
    net::{SocketAddr, SocketAddrV4},
    sync::Mutex as StdMutex,
};
use tokio::sync::{mpsc, Mutex, Notify};

/// A mailbox standing in for the UDP socket.
///
/// `send_to` lands in a queue the test can drain with [`Mailbox::sent`] or
/// await with [`Mailbox::next_sent`]; [`Mailbox::deliver`] makes a
/// datagram appear on the receive side.
pub struct Mailbox {
    inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddrV4)>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddrV4)>>,
    outbound: StdMutex<VecDeque<(Vec<u8>, SocketAddrV4)>>,
    outbound_ready: Notify,
}

impl Mailbox {
    pub fn new() -> Mailbox {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Mailbox {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound: StdMutex::new(VecDeque::new()),
            outbound_ready: Notify::new(),
        }
    }

    /// Injects an inbound datagram, as if `source` had sent it to us.
    pub fn deliver(&self, payload: Vec<u8>, source: SocketAddrV4) {
        // The receiver lives as long as the mailbox, so this cannot fail.
        let _ = self.inbound_tx.send((payload, source));
    }

    /// Everything sent so far, oldest first, without consuming the queue.
    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddrV4)> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Waits for and consumes the next outbound datagram.
    pub async fn next_sent(&self) -> (Vec<u8>, SocketAddrV4) {
        loop {
            let ready = self.outbound_ready.notified();
            if let Some(datagram) = self.pop_sent() {
                return datagram;
            }
            ready.await;
        }
    }

    fn pop_sent(&self) -> Option<(Vec<u8>, SocketAddrV4)> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

impl Default for Mailbox {
    fn default() -> Mailbox {
        Mailbox::new()
    }
}

#[async_trait]
impl PacketTransport for Mailbox {
    async fn send_to(&self, payload: &[u8], target: SocketAddrV4) -> io::Result<()> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back((payload.to_vec(), target));
        self.outbound_ready.notify_one();
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound_rx.lock().await;
        match inbound.recv().await {
            Some((payload, source)) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Ok((len, SocketAddr::V4(source)))
            }
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mailbox closed",
            )),
        }
    }
}
