use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::sleep;

use crate::core::Config;
use crate::core::protocol::{self, ParseError, Request};
use crate::network::transport::{DatagramCodec, RECV_BUFFER};
use crate::storage::{FileIndex, compile_search};
use crate::utils::{MetricsCollector, NetUtils, Result};

/// Answers hello and search datagrams on the shared UDP port.
pub struct Responder {
    socket: Arc<UdpSocket>,
    context: Arc<Context>,
}

struct Context {
    config: Arc<Config>,
    index: FileIndex,
    codec: DatagramCodec,
    metrics: MetricsCollector,
}

impl Responder {
    pub async fn bind(
        config: Arc<Config>,
        index: FileIndex,
        metrics: MetricsCollector,
    ) -> Result<Self> {
        let socket = NetUtils::create_broadcast_socket(config.listen_addr()).await?;
        let codec = DatagramCodec::from_config(&config);
        info!(
            "Responder listening on {} (network {}, {})",
            socket.local_addr()?,
            config.network_name,
            if codec.is_encrypted() { "encrypted" } else { "plain" }
        );

        Ok(Self {
            socket: Arc::new(socket),
            context: Arc::new(Context {
                config,
                index,
                codec,
                metrics,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until the task is dropped. Every datagram is handled on its
    /// own task.
    pub async fn run(self) {
        let mut buffer = vec![0u8; RECV_BUFFER];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let datagram = buffer[..len].to_vec();
                    let socket = self.socket.clone();
                    let context = self.context.clone();
                    tokio::spawn(async move {
                        context.handle(&socket, datagram, addr).await;
                    });
                }
                Err(e) => {
                    warn!("Responder receive error: {}", e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

impl Context {
    async fn handle(&self, socket: &UdpSocket, datagram: Vec<u8>, addr: SocketAddr) {
        self.metrics.record_datagram().await;
        if addr.ip() == self.config.broadcast_ip {
            warn!("Got message from broadcast address {}", addr);
        }

        let payload = match self.codec.open(&datagram) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", addr, e);
                self.metrics.record_rejected_datagram().await;
                return;
            }
        };
        debug!("Responder: {} {:?}", addr, String::from_utf8_lossy(&payload));

        match Request::parse(&payload, &self.config.network_name) {
            Ok(Request::Hello) => {
                let reply =
                    protocol::hello_reply(&self.config.network_name, &self.config.hostname);
                if self.reply(socket, &reply, addr).await {
                    self.metrics.record_hello_reply().await;
                }
            }
            Ok(Request::Search { pattern }) => self.search(socket, &pattern, addr).await,
            Err(ParseError::Undecodable) => {
                debug!("Dropping search from {} with undecodable pattern", addr);
                self.metrics.record_rejected_datagram().await;
            }
            Err(ParseError::Unknown) => {
                debug!("Ignoring unknown datagram from {}", addr);
                self.metrics.record_rejected_datagram().await;
            }
        }
    }

    async fn search(&self, socket: &UdpSocket, pattern: &str, addr: SocketAddr) {
        let regex = match compile_search(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!("Received an invalid search pattern from {}: {}", addr, e);
                self.metrics.record_rejected_datagram().await;
                return;
            }
        };

        let results = self.index.search(&regex).await;
        let snapshot = results.snapshot();
        let mut sent = 0;
        for path in results {
            let reply = protocol::search_reply(pattern, snapshot.relative(&path));
            if self.reply(socket, &reply, addr).await {
                sent += 1;
            }
        }
        debug!("Answered search {:?} from {} with {} results", pattern, addr, sent);
        self.metrics.record_search_replies(sent).await;
    }

    async fn reply(&self, socket: &UdpSocket, payload: &[u8], addr: SocketAddr) -> bool {
        let datagram = match self.codec.seal(payload) {
            Ok(datagram) => datagram,
            Err(e) => {
                error!("Failed to seal reply to {}: {}", addr, e);
                return false;
            }
        };
        match socket.send_to(&datagram, addr).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Failed to reply to {}: {}", addr, e);
                false
            }
        }
    }
}
