use async_trait::async_trait;
use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
};
use tokio::net::UdpSocket;

/// Largest datagram the node will read; anything past the assumed path
/// MTU is truncated and dropped as malformed.
pub const MAX_DATAGRAM_LEN: usize = 1472;

/// The unreliable datagram transport the engine runs over.
///
/// Production code hands in a bound [`UdpSocket`]; tests hand in a
/// [`crate::testing::Mailbox`] so datagrams can be injected and captured
/// deterministically.
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Fire-and-forget transmit. Failures are the caller's to log; the
    /// engine never retries a send.
    async fn send_to(&self, payload: &[u8], target: SocketAddrV4) -> io::Result<()>;

    /// Waits for the next datagram, copying it into `buf`.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl PacketTransport for UdpSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddrV4) -> io::Result<()> {
        UdpSocket::send_to(self, payload, SocketAddr::V4(target))
            .await
            .map(|_| ())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}
