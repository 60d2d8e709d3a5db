use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{DnsError, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Sends one query to the upstream resolver and waits for its reply.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// Each call owns a fresh ephemeral socket, released on every return
    /// path. The first datagram received is the answer; later ones are never
    /// read.
    pub async fn forward(&self, packet: &[u8]) -> Result<Bytes> {
        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.upstream).await?;

        let bytes_sent = socket.send(packet).await?;
        debug!(upstream = %self.upstream, bytes_sent, "query forwarded");

        let mut recv_buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let bytes_received = tokio::time::timeout(self.timeout, socket.recv(&mut recv_buf))
            .await
            .map_err(|_| DnsError::Timeout {
                upstream: self.upstream,
                after: self.timeout,
            })??;

        recv_buf.truncate(bytes_received);
        debug!(upstream = %self.upstream, bytes_received, "upstream response received");

        Ok(Bytes::from(recv_buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn upstream(replies: Vec<&'static [u8]>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, from) = socket.recv_from(&mut buf).await.unwrap();
            for reply in replies {
                socket.send_to(reply, from).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_forward_returns_first_datagram() {
        let addr = upstream(vec![&b"first"[..], &b"second"[..]]).await;
        let forwarder = Forwarder::new(addr, DEFAULT_TIMEOUT);

        let response = forwarder.forward(b"query").await.unwrap();
        assert_eq!(response, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_forward_times_out() {
        let addr = upstream(vec![]).await;
        let forwarder = Forwarder::new(addr, Duration::from_millis(100));

        let err = forwarder.forward(b"query").await.unwrap_err();
        assert!(matches!(err, DnsError::Timeout { upstream: to, .. } if to == addr));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_closed_port_is_a_transport_error() {
        let addr = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap()
        };
        let forwarder = Forwarder::new(addr, Duration::from_secs(2));

        let started = std::time::Instant::now();
        let err = forwarder.forward(b"query").await.unwrap_err();
        assert_eq!(err.kind(), "transport", "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_concurrent_forwards_do_not_cross() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, from) = socket.recv_from(&mut buf).await.unwrap();
                socket.send_to(&buf[..n], from).await.unwrap();
            }
        });

        let forwarder = Forwarder::new(addr, DEFAULT_TIMEOUT);
        let (a, b) = tokio::join!(forwarder.forward(b"aaaa"), forwarder.forward(b"bbbb"));
        assert_eq!(a.unwrap(), Bytes::from_static(b"aaaa"));
        assert_eq!(b.unwrap(), Bytes::from_static(b"bbbb"));
    }
}
