use log::{debug, info, warn};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout};

use crate::core::Config;
use crate::core::protocol;
use crate::network::transport::{DatagramCodec, RECV_BUFFER};
use crate::utils::{Cache, NetUtils, Result, quote_path};

/// Longest wait of a single non-blocking poll.
const POLL_SLICE: Duration = Duration::from_millis(1);

const RESOLVER_CAPACITY: usize = 256;

/// One step of a polled sequence: a value, or nothing yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Item(T),
    Idle,
}

impl<T> Step<T> {
    pub fn item(self) -> Option<T> {
        match self {
            Step::Item(item) => Some(item),
            Step::Idle => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Wait for replies until the deadline.
    Blocking,
    /// Return [`Step::Idle`] when nothing arrived within a millisecond.
    NonBlocking,
}

/// A discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub url: String,
}

/// Reverse DNS with a per-address cache. Failed lookups fall back to the
/// textual address.
#[derive(Clone)]
pub struct HostResolver {
    enabled: bool,
    cache: Cache<IpAddr, String>,
}

impl HostResolver {
    pub fn new(enabled: bool, cache_timeout: Duration) -> Self {
        Self {
            enabled,
            cache: Cache::new(cache_timeout, RESOLVER_CAPACITY),
        }
    }

    /// Host part of a URL pointing at `ip`.
    pub async fn resolve(&self, ip: IpAddr) -> String {
        if !self.enabled {
            return url_host(ip);
        }
        self.cache
            .get_or_insert_with(ip, || async move {
                match tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await {
                    Ok(Ok(name)) => name,
                    Ok(Err(e)) => {
                        debug!("Reverse lookup of {} failed: {}", ip, e);
                        url_host(ip)
                    }
                    Err(e) => {
                        warn!("Reverse lookup of {} panicked: {}", ip, e);
                        url_host(ip)
                    }
                }
            })
            .await
    }
}

fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{}]", ip),
    }
}

/// Deadline bound reply collection shared by discovery and search.
struct ReplyCollector {
    socket: UdpSocket,
    codec: DatagramCodec,
    mode: PollMode,
    deadline: Instant,
    buffer: Vec<u8>,
}

impl ReplyCollector {
    async fn send(
        config: &Config,
        codec: DatagramCodec,
        payload: &[u8],
        window: Duration,
        mode: PollMode,
    ) -> Result<Self> {
        let bind_addr = SocketAddr::new(unspecified_like(config.broadcast_ip), 0);
        let socket = NetUtils::create_broadcast_socket(bind_addr).await?;
        socket.send_to(&codec.seal(payload)?, config.broadcast_addr()).await?;

        Ok(Self {
            socket,
            codec,
            mode,
            deadline: Instant::now() + window,
            buffer: vec![0u8; RECV_BUFFER],
        })
    }

    /// `None` once the deadline has passed.
    async fn next(&mut self) -> Option<Step<(String, SocketAddr)>> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return None;
            }
            let remaining = self.deadline - now;
            let wait = match self.mode {
                PollMode::Blocking => remaining,
                PollMode::NonBlocking => remaining.min(POLL_SLICE),
            };

            match timeout(wait, self.socket.recv_from(&mut self.buffer)).await {
                Ok(Ok((len, addr))) => {
                    let payload = match self.codec.open(&self.buffer[..len]) {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!("Dropping reply from {}: {}", addr, e);
                            continue;
                        }
                    };
                    match String::from_utf8(payload) {
                        Ok(text) => {
                            debug!("recv {} {:?}", addr, text);
                            return Some(Step::Item((text, addr)));
                        }
                        Err(_) => debug!("Dropping undecodable reply from {}", addr),
                    }
                }
                // UDP is lossy anyway, keep listening.
                Ok(Err(e)) => debug!("Receive error while collecting replies: {}", e),
                Err(_) => {
                    if self.mode == PollMode::NonBlocking {
                        return Some(Step::Idle);
                    }
                }
            }
        }
    }
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    }
}

/// Client side of the discovery protocol.
#[derive(Clone)]
pub struct DiscoveryClient {
    config: Arc<Config>,
    codec: DatagramCodec,
    resolver: HostResolver,
}

impl DiscoveryClient {
    pub fn new(config: Arc<Config>) -> Self {
        let codec = DatagramCodec::from_config(&config);
        let resolver = HostResolver::new(config.resolve_hosts, config.cache_timeout());
        Self {
            config,
            codec,
            resolver,
        }
    }

    /// Static hosts first, then peers answering a broadcast hello.
    pub fn discover(&self, mode: PollMode) -> Discovery {
        Discovery {
            client: self.clone(),
            mode,
            pending_static: self.config.static_hosts.iter().cloned().collect(),
            collector: None,
            done: false,
        }
    }

    /// Broadcast a search for `pattern` and collect result URLs.
    pub async fn search(&self, pattern: &str, mode: PollMode) -> Result<Search> {
        let request = protocol::search_request(&self.config.network_name, pattern);
        let collector = ReplyCollector::send(
            &self.config,
            self.codec.clone(),
            &request,
            self.config.search_timeout(),
            mode,
        )
        .await?;
        info!("Searching for {:?}", pattern);

        Ok(Search {
            client: self.clone(),
            pattern: pattern.to_string(),
            collector,
            results: 0,
        })
    }

    /// Every host found before the discovery deadline.
    pub async fn discover_all(&self) -> Result<Vec<Host>> {
        let mut discovery = self.discover(PollMode::Blocking);
        let mut hosts = Vec::new();
        while let Some(step) = discovery.next().await? {
            hosts.extend(step.item());
        }
        Ok(hosts)
    }

    /// Every hit received before the search deadline or the result cap.
    pub async fn search_all(&self, pattern: &str) -> Result<Vec<String>> {
        let mut search = self.search(pattern, PollMode::Blocking).await?;
        let mut hits = Vec::new();
        while let Some(step) = search.next().await {
            hits.extend(step.item());
        }
        Ok(hits)
    }
}

/// Lazily produced sequence of [`Host`]s.
pub struct Discovery {
    client: DiscoveryClient,
    mode: PollMode,
    pending_static: VecDeque<String>,
    collector: Option<ReplyCollector>,
    done: bool,
}

impl Discovery {
    /// The next host, [`Step::Idle`] in non-blocking mode, or `None` when
    /// discovery is over. Nothing is sent until the static hosts are used
    /// up.
    pub async fn next(&mut self) -> Result<Option<Step<Host>>> {
        if let Some(entry) = self.pending_static.pop_front() {
            return Ok(Some(Step::Item(Host {
                name: entry.clone(),
                url: entry,
            })));
        }
        if self.done {
            return Ok(None);
        }

        let config = self.client.config.clone();
        if self.collector.is_none() {
            let hello = protocol::hello(&config.network_name);
            self.collector = Some(
                ReplyCollector::send(
                    &config,
                    self.client.codec.clone(),
                    &hello,
                    config.discover_timeout(),
                    self.mode,
                )
                .await?,
            );
        }
        let Some(collector) = self.collector.as_mut() else {
            return Ok(None);
        };

        loop {
            let Some(step) = collector.next().await else {
                self.done = true;
                return Ok(None);
            };
            let (text, addr) = match step {
                Step::Item(reply) => reply,
                Step::Idle => return Ok(Some(Step::Idle)),
            };

            if config.static_hosts.contains(&addr.to_string()) {
                debug!("Suppressing reply from static host {}", addr);
                continue;
            }
            match protocol::parse_hello_reply(&text, &config.network_name) {
                Some(name) => {
                    let host = self.client.resolver.resolve(addr.ip()).await;
                    return Ok(Some(Step::Item(Host {
                        name: name.to_string(),
                        url: format!("http://{}:{}/", host, addr.port()),
                    })));
                }
                None => {
                    debug!("Ignoring non-hello reply from {}", addr);
                    if self.mode == PollMode::NonBlocking {
                        return Ok(Some(Step::Idle));
                    }
                }
            }
        }
    }
}

/// Lazily produced sequence of search hit URLs.
pub struct Search {
    client: DiscoveryClient,
    pattern: String,
    collector: ReplyCollector,
    results: usize,
}

impl Search {
    pub async fn next(&mut self) -> Option<Step<String>> {
        if self.results >= self.client.config.max_search_results {
            return None;
        }
        loop {
            let (text, addr) = match self.collector.next().await? {
                Step::Item(reply) => reply,
                Step::Idle => return Some(Step::Idle),
            };
            match protocol::parse_search_reply(&text, &self.pattern) {
                Some(path) => {
                    self.results += 1;
                    let host = self.client.resolver.resolve(addr.ip()).await;
                    return Some(Step::Item(format!(
                        "http://{}:{}/{}",
                        host,
                        addr.port(),
                        quote_path(path)
                    )));
                }
                None => {
                    debug!("Ignoring unrelated reply from {}", addr);
                    if self.collector.mode == PollMode::NonBlocking {
                        return Some(Step::Idle);
                    }
                }
            }
        }
    }
}
