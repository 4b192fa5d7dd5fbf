//! Server addressing, deadlines, connections and the connection pool.

pub mod connection;
pub mod pool;

pub use connection::{AdminConnection, Connection, Framing, JobConnection};
pub use pool::{Selected, ServerPool};

use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_PORT;
use crate::error::{GearError, Result};

// ── ServerEndpoint ───────────────────────────────────────────────

/// A job server address, resolved when it is created.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    host: String,
    port: u16,
    addrs: Vec<SocketAddr>,
}

impl ServerEndpoint {
    /// Resolve `host:port`. A non-positive port selects [`DEFAULT_PORT`].
    pub fn resolve(host: &str, port: i32) -> Result<Self> {
        let port = match port {
            p if p <= 0 => DEFAULT_PORT,
            p => u16::try_from(p).map_err(|_| GearError::AddressResolution {
                target: format!("{host}:{p}"),
                reason: "port out of range".into(),
            })?,
        };
        let host = host.trim();
        if host.is_empty() {
            return Err(GearError::AddressResolution {
                target: format!(":{port}"),
                reason: "empty host".into(),
            });
        }

        let target = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| GearError::AddressResolution {
                target: target.clone(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(GearError::AddressResolution {
                target,
                reason: "no addresses found".into(),
            });
        }

        Ok(Self {
            host: host.to_string(),
            port,
            addrs,
        })
    }

    /// Parse and resolve `host`, `host:port` or `[v6-addr]:port`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (host, port) = split_host_port(spec.trim())?;
        Self::resolve(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }
}

impl PartialEq for ServerEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for ServerEndpoint {}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(spec: &str) -> Result<(&str, i32)> {
    let bad_port = |port: &str| GearError::AddressResolution {
        target: spec.to_string(),
        reason: format!("invalid port {port:?}"),
    };

    if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| GearError::AddressResolution {
            target: spec.to_string(),
            reason: "unterminated '['".into(),
        })?;
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, port.parse().map_err(|_| bad_port(port))?)),
            None if tail.is_empty() => Ok((host, 0)),
            None => Err(bad_port(tail)),
        };
    }

    match spec.split_once(':') {
        // More than one colon: a bare IPv6 address.
        Some((_, port)) if port.contains(':') => Ok((spec, 0)),
        Some((host, port)) => Ok((host, port.parse().map_err(|_| bad_port(port))?)),
        None => Ok((spec, 0)),
    }
}

// ── Deadline ─────────────────────────────────────────────────────

/// Absolute cut-off for one engine operation, built from a millisecond
/// timeout: negative never expires, zero polls once.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after_ms(timeout_ms: i64) -> Self {
        if timeout_ms < 0 {
            return Self::never();
        }
        let budget = Duration::from_millis(timeout_ms.unsigned_abs());
        Self {
            at: Some(Instant::now() + budget),
            budget,
        }
    }

    pub fn never() -> Self {
        Self {
            at: None,
            budget: Duration::ZERO,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Drive `fut`, failing with `Timeout` once the deadline passes.
    /// The future is polled at least once.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        match self.at {
            None => Ok(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| GearError::Timeout(self.budget)),
        }
    }
}
