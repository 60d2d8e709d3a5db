use crate::cache::{cacheable_ttl, ResponseCache};
use crate::dns_hdr::{Message, OpCode, Question};
use crate::error::Result;
use crate::forwarder::Forwarder;
use crate::query::{merge_responses, not_implemented, split_query};
use anyhow::Context;
use bytes::Bytes;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Turns one client datagram into one reply datagram.
pub struct QueryHandler {
    forwarder: Forwarder,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl QueryHandler {
    pub fn new(forwarder: Forwarder, cache: Option<Arc<dyn ResponseCache>>) -> Self {
        Self { forwarder, cache }
    }

    /// Decodes, forwards every question concurrently and merges the replies.
    /// Any failed sub-query fails the whole datagram.
    pub async fn handle(&self, packet: Bytes) -> Result<Bytes> {
        let query = Message::from_bytes(&packet)?;
        debug!(
            id = query.header.id,
            questions = ?query
                .questions
                .iter()
                .map(|q| format!("{} {} {}", q.name, q.qclass, q.qtype))
                .collect::<Vec<_>>(),
            "received DNS query"
        );

        if query.header.flags.opcode != OpCode::QUERY as u8 {
            return not_implemented(&query);
        }

        let packets = split_query(&packet, &query)?;
        let lookups = query
            .questions
            .iter()
            .zip(packets)
            .map(|(question, packet)| self.resolve(question, packet));

        let responses = join_all(lookups)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        merge_responses(query.header.id, &query.header, &query.questions, &responses)
    }

    async fn resolve(&self, question: &Question, packet: Bytes) -> Result<Bytes> {
        let key = question.cache_key();

        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(key = %key, "cache hit");
            return Ok(cached);
        }

        let response = self.forwarder.forward(&packet).await?;

        if let Some(cache) = &self.cache {
            if let Some(ttl) = cacheable_ttl(&response) {
                cache.set(&key, response.clone(), ttl);
            }
        }

        Ok(response)
    }
}

pub struct DNSServer {
    socket: Arc<UdpSocket>,
    handler: Arc<QueryHandler>,
}

impl DNSServer {
    pub async fn bind(addr: SocketAddr, handler: QueryHandler) -> anyhow::Result<Self> {
        let udp_socket = UdpSocket::bind(addr)
            .await
            .context("Failed to bind to address")?;

        Ok(Self {
            socket: Arc::new(udp_socket),
            handler: Arc::new(handler),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves until the socket fails. Each datagram is handled on its own task;
    /// a failed one is logged and dropped without a reply.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut buf = [0; 512];

        loop {
            let (size, source) = self
                .socket
                .recv_from(&mut buf)
                .await
                .context("Error receiving data")?;
            debug!(remote = %source, size, "datagram received");

            let packet = Bytes::copy_from_slice(&buf[..size]);
            let handler = Arc::clone(&self.handler);
            let socket = Arc::clone(&self.socket);

            tokio::spawn(async move {
                match handler.handle(packet).await {
                    Ok(response) => {
                        if let Err(e) = socket.send_to(&response, source).await {
                            warn!(remote = %source, error = %e, "failed to send response");
                        }
                    }
                    Err(e) => {
                        warn!(remote = %source, kind = e.kind(), error = %e, "dropping query");
                    }
                }
            });
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            listen = %self.local_addr()?,
            upstream = %self.handler.forwarder.upstream(),
            "DNS server running"
        );
        self.start().await
    }
}
