use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// One TCP-connectable address of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a concrete socket address, preferring the first result.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {self}"),
                )
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The ordered endpoint list of one logical server: the primary first,
/// then its standbys. Failover walks the list and wraps around.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub endpoints: Vec<Endpoint>,
}

impl ServerInfo {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        ServerInfo { endpoints }
    }

    pub fn single(host: impl Into<String>, port: u16) -> Self {
        ServerInfo {
            endpoints: vec![Endpoint::new(host, port)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Yields the endpoint list for a logical server name.
pub trait Resolver: Send + Sync {
    fn resolve(&self, authority: &str) -> io::Result<ServerInfo>;
}

/// A fixed name-to-endpoints table, enough for config-file driven setups.
#[derive(Debug, Default)]
pub struct StaticResolver {
    servers: HashMap<String, ServerInfo>,
}

impl StaticResolver {
    pub fn new() -> Self {
        StaticResolver::default()
    }

    pub fn insert(&mut self, authority: impl Into<String>, info: ServerInfo) {
        self.servers.insert(authority.into(), info);
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, authority: &str) -> io::Result<ServerInfo> {
        self.servers.get(authority).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("unknown server {authority}"),
            )
        })
    }
}

/// Walks a [`ServerInfo`] endpoint list; failover advances the cursor with
/// wraparound so a flapping primary eventually gets revisited.
#[derive(Debug, Default)]
pub(crate) struct EndpointCursor {
    endpoints: Vec<Endpoint>,
    current: usize,
}

impl EndpointCursor {
    pub fn replace(&mut self, info: ServerInfo) {
        self.endpoints = info.endpoints;
        self.current = 0;
    }

    pub fn current(&self) -> Option<&Endpoint> {
        self.endpoints.get(self.current)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn advance(&mut self) -> Option<&Endpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.endpoints.len();
        self.endpoints.get(self.current)
    }
}
