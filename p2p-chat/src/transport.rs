//! Connection establishment: dial the peer, or wait for the peer to dial us.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use tokio::net::{TcpListener, TcpStream, lookup_host};
use tracing::{info, warn};

/// Port used for both listening and dialing unless overridden.
pub const DEFAULT_PORT: u16 = 65329;

/// Token that selects listen mode instead of dialing.
pub const LISTEN_TOKEN: &str = "s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Listen,
    Dial(String),
}

impl Target {
    pub fn parse(token: &str) -> Result<Self, EstablishError> {
        let token = token.trim();
        match token {
            "" => Err(EstablishError::InvalidAddress(String::new())),
            LISTEN_TOKEN => Ok(Target::Listen),
            host => Ok(Target::Dial(host.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstablishError {
    #[error("invalid address format: {0:?}")]
    InvalidAddress(String),
    #[error("address {host:?} could not be resolved")]
    Unresolvable {
        host: String,
        #[source]
        source: Option<io::Error>,
    },
    #[error("failed to listen on {addr}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept a peer connection")]
    Accept(#[source] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct EstablisherConfig {
    pub port: u16,
    pub bind: IpAddr,
}

impl Default for EstablisherConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

pub struct Establisher {
    config: EstablisherConfig,
}

impl Establisher {
    pub fn new(config: EstablisherConfig) -> Self {
        Self { config }
    }

    /// Produces one connected stream for `target`.
    ///
    /// A dial that resolves but cannot connect falls back to listening, on the
    /// assumption that the peer will dial us instead.
    pub async fn establish(&self, target: &Target) -> Result<TcpStream, EstablishError> {
        self.establish_with(target, |_| {}).await
    }

    /// Like [`establish`](Self::establish), calling `on_listening` with the
    /// bound address whenever it ends up waiting for the peer.
    pub async fn establish_with<F>(
        &self,
        target: &Target,
        on_listening: F,
    ) -> Result<TcpStream, EstablishError>
    where
        F: FnOnce(SocketAddr),
    {
        let stream = match target {
            Target::Listen => self.accept_one(on_listening).await?,
            Target::Dial(host) => match self.dial(host).await? {
                Some(stream) => stream,
                None => {
                    warn!(%host, "peer is not listening; waiting for it to dial in");
                    self.accept_one(on_listening).await?
                }
            },
        };
        if let Err(error) = stream.set_nodelay(true) {
            warn!(?error, "failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn accept_one<F>(&self, on_listening: F) -> Result<TcpStream, EstablishError>
    where
        F: FnOnce(SocketAddr),
    {
        let pending = self.listen().await?;
        if let Ok(addr) = pending.local_addr() {
            on_listening(addr);
        }
        pending.accept().await
    }

    /// Binds the listening socket without waiting for a peer yet.
    pub async fn listen(&self) -> Result<PendingAccept, EstablishError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EstablishError::Listen { addr, source })?;
        info!(%addr, "waiting for a peer to connect");
        Ok(PendingAccept { listener })
    }

    /// Returns `Ok(None)` when the address resolved but no connection could be
    /// made.
    async fn dial(&self, host: &str) -> Result<Option<TcpStream>, EstablishError> {
        let candidates = self.resolve(host).await?;
        for addr in candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!(%addr, "connected to peer");
                    return Ok(Some(stream));
                }
                Err(error) => info!(%addr, %error, "dial failed"),
            }
        }
        Ok(None)
    }

    async fn resolve(&self, host: &str) -> Result<Vec<SocketAddr>, EstablishError> {
        let port = self.config.port;
        if let Some(ip) = parse_ip_literal(host) {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        // Zone ids of scoped IPv6 literals are resolved by the system.
        let host = unbracket(host);
        if !is_hostname(host) && !is_scoped_ipv6(host) {
            return Err(EstablishError::InvalidAddress(host.to_string()));
        }
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|source| EstablishError::Unresolvable {
                host: host.to_string(),
                source: Some(source),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(EstablishError::Unresolvable {
                host: host.to_string(),
                source: None,
            });
        }
        Ok(addrs)
    }
}

/// A bound listener that accepts exactly one peer.
pub struct PendingAccept {
    listener: TcpListener,
}

impl PendingAccept {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one connection. The listener is closed afterwards.
    pub async fn accept(self) -> Result<TcpStream, EstablishError> {
        let (stream, peer) = self.listener.accept().await.map_err(EstablishError::Accept)?;
        info!(%peer, "peer connected");
        Ok(stream)
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host)
}

fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    unbracket(host).parse().ok()
}

/// `fe80::1%eth0` style literal with a zone id.
fn is_scoped_ipv6(host: &str) -> bool {
    match host.split_once('%') {
        Some((addr, zone)) => {
            addr.parse::<Ipv6Addr>().is_ok()
                && !zone.is_empty()
                && zone
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        None => false,
    }
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && !host.starts_with(['-', '.'])
        && !host.ends_with('-')
        && !host.contains("..")
}
