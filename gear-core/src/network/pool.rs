//! Ordered set of job servers with lazily opened connections.

use std::pin::Pin;

use futures::future::{Future, select_all};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::codec::PacketCodec;
use crate::error::{GearError, Result};
use crate::network::connection::{Connection, Framing};
use crate::network::{Deadline, ServerEndpoint};
use crate::state::ConnectionPhase;

type Item<C> = <C as Decoder>::Item;

/// One configured server and its (possibly absent) connection.
#[derive(Debug)]
struct ServerSlot<C> {
    endpoint: ServerEndpoint,
    phase: ConnectionPhase,
    conn: Option<Connection<C>>,
}

/// Result of [`ServerPool::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub index: usize,
    /// The connection was opened by this call, so per-connection setup
    /// (abilities, options) has not been sent on it yet.
    pub fresh: bool,
}

/// Round-robin pool of server connections.
///
/// Endpoints are resolved when added. Connections open on first use and
/// are dropped on any I/O error; the endpoint is then marked failed and
/// only retried after the healthy ones.
#[derive(Debug)]
pub struct ServerPool<C = PacketCodec> {
    slots: Vec<ServerSlot<C>>,
    cursor: usize,
}

impl<C> Default for ServerPool<C> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
        }
    }
}

impl<C: Framing> ServerPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Configuration ────────────────────────────────────────────

    /// Resolve and append a server. Adding an endpoint twice is a no-op.
    pub fn add_server(&mut self, host: &str, port: i32) -> Result<()> {
        let endpoint = ServerEndpoint::resolve(host, port)?;
        self.push(endpoint);
        Ok(())
    }

    /// Add every `host[:port]` spec; a spec may itself be a
    /// comma-separated list. Stops at the first unresolvable entry.
    pub fn add_servers<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        for spec in specs {
            for part in spec.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
                self.push(ServerEndpoint::parse(part)?);
            }
        }
        Ok(())
    }

    /// Forget every server and close their connections.
    pub fn remove_all(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }

    fn push(&mut self, endpoint: ServerEndpoint) {
        if self.slots.iter().any(|s| s.endpoint == endpoint) {
            debug!(%endpoint, "server already configured");
            return;
        }
        debug!(%endpoint, "server added");
        self.slots.push(ServerSlot {
            endpoint,
            phase: ConnectionPhase::default(),
            conn: None,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.slots.iter().map(|s| &s.endpoint)
    }

    pub fn endpoint(&self, index: usize) -> Option<&ServerEndpoint> {
        self.slots.get(index).map(|s| &s.endpoint)
    }

    pub fn phase(&self, index: usize) -> Option<&ConnectionPhase> {
        self.slots.get(index).map(|s| &s.phase)
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|s| s.conn.is_some())
    }

    /// Same endpoints, no connections.
    pub fn clone_endpoints(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|s| ServerSlot {
                    endpoint: s.endpoint.clone(),
                    phase: ConnectionPhase::default(),
                    conn: None,
                })
                .collect(),
            cursor: 0,
        }
    }

    // ── Connections ──────────────────────────────────────────────

    /// Make sure slot `index` has an open connection. Returns `true`
    /// when the connection was opened by this call.
    pub async fn connect(&mut self, index: usize, deadline: &Deadline) -> Result<bool> {
        let slot = self.slot_mut(index)?;
        if slot.conn.is_some() {
            return Ok(false);
        }

        slot.phase.begin_connect()?;
        match deadline.run(Connection::connect(&slot.endpoint)).await {
            Ok(Ok(conn)) => {
                slot.phase.complete_connect()?;
                info!(endpoint = %slot.endpoint, "connected");
                slot.conn = Some(conn);
                Ok(true)
            }
            Ok(Err(e)) | Err(e) => {
                warn!(endpoint = %slot.endpoint, "connect failed: {e}");
                slot.phase.fail(e.to_string())?;
                Err(e)
            }
        }
    }

    /// Pick the next server round-robin and connect to it, trying healthy
    /// endpoints before failed ones.
    pub async fn select(&mut self, deadline: &Deadline) -> Result<Selected> {
        if self.slots.is_empty() {
            return Err(GearError::NoServers);
        }

        let n = self.slots.len();
        let rotation: Vec<usize> = (0..n).map(|i| (self.cursor + i) % n).collect();
        let (healthy, failed): (Vec<usize>, Vec<usize>) = rotation
            .into_iter()
            .partition(|&i| self.slots[i].phase.is_healthy());

        let mut last_err = None;
        for index in healthy.into_iter().chain(failed) {
            match self.connect(index, deadline).await {
                Ok(fresh) => {
                    self.cursor = (index + 1) % n;
                    return Ok(Selected { index, fresh });
                }
                Err(e @ GearError::Timeout(_)) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(GearError::NoServers))
    }

    /// Connect every server that is not connected yet. Returns the
    /// indices that were freshly opened; fails only when no server at all
    /// is reachable.
    pub async fn connect_all(&mut self, deadline: &Deadline) -> Result<Vec<usize>> {
        if self.slots.is_empty() {
            return Err(GearError::NoServers);
        }

        let mut fresh = Vec::new();
        let mut last_err = None;
        for index in 0..self.slots.len() {
            match self.connect(index, deadline).await {
                Ok(true) => fresh.push(index),
                Ok(false) => {}
                Err(e @ GearError::Timeout(_)) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if self.connected().next().is_none() => Err(e),
            _ => Ok(fresh),
        }
    }

    /// Indices of slots with an open connection.
    pub fn connected(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.conn.is_some())
            .map(|(i, _)| i)
    }

    /// Drop slot `index`'s connection after an error.
    pub fn mark_failed(&mut self, index: usize, reason: &GearError) {
        if let Some(slot) = self.slots.get_mut(index) {
            warn!(
                endpoint = %slot.endpoint,
                uptime = ?slot.phase.connected_duration(),
                "dropping connection: {reason}"
            );
            slot.conn = None;
            if slot.phase.fail(reason.to_string()).is_err() {
                slot.phase.force_disconnect();
            }
        }
    }

    /// Close every connection; endpoints stay configured.
    pub fn disconnect_all(&mut self) {
        for slot in &mut self.slots {
            slot.conn = None;
            slot.phase.force_disconnect();
        }
    }

    // ── I/O ──────────────────────────────────────────────────────

    /// Write one item to slot `index`. Any failure, including a timeout
    /// that may have left a partial frame behind, drops the connection.
    pub async fn send(&mut self, index: usize, item: Item<C>, deadline: &Deadline) -> Result<()> {
        let conn = self.conn_mut(index)?;
        let result = deadline.run(conn.send(item)).await.and_then(|sent| sent);
        if let Err(e) = &result {
            self.mark_failed(index, e);
        }
        result
    }

    /// Read one item from slot `index`. A timeout leaves the connection
    /// open since framed reads are cancel-safe.
    pub async fn recv(&mut self, index: usize, deadline: &Deadline) -> Result<Item<C>> {
        let conn = self.conn_mut(index)?;
        let result = deadline.run(conn.recv()).await?;
        if let Err(e) = &result {
            self.mark_failed(index, e);
        }
        result
    }

    /// Wait on every open connection and return the first item to arrive
    /// with the index it came from. A connection error is returned in the
    /// inner result after the slot has been marked failed; the outer
    /// result only fails on timeout or when nothing is connected.
    pub async fn recv_any(&mut self, deadline: &Deadline) -> Result<(usize, Result<Item<C>>)> {
        type Pending<'a, T> = Pin<Box<dyn Future<Output = (usize, Result<T>)> + Send + 'a>>;

        let waiting: Vec<Pending<'_, Item<C>>> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let conn = slot.conn.as_mut()?;
                let fut: Pending<'_, _> = Box::pin(async move { (index, conn.recv().await) });
                Some(fut)
            })
            .collect();
        if waiting.is_empty() {
            return Err(GearError::UnknownState(
                "no open connection to receive from".into(),
            ));
        }

        let ((index, item), _, _) = deadline.run(select_all(waiting)).await?;
        if let Err(e) = &item {
            self.mark_failed(index, e);
        }
        Ok((index, item))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut ServerSlot<C>> {
        self.slots
            .get_mut(index)
            .ok_or_else(|| GearError::UnknownState(format!("no server at index {index}")))
    }

    fn conn_mut(&mut self, index: usize) -> Result<&mut Connection<C>> {
        self.slot_mut(index)?
            .conn
            .as_mut()
            .ok_or_else(|| GearError::UnknownState(format!("server {index} is not connected")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;
    use crate::packet::Packet;
    use tokio::net::TcpListener;

    #[test]
    fn add_and_remove() {
        let mut pool: ServerPool = ServerPool::new();
        assert!(pool.is_empty());
        pool.add_server("127.0.0.1", -1).unwrap();
        pool.add_server("127.0.0.1", 4730).unwrap();
        pool.add_servers(&["127.0.0.1:4731,127.0.0.1:4732", "localhost"]).unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.endpoint(1).unwrap().port(), 4731);

        pool.remove_all();
        assert!(pool.is_empty());
        assert_eq!(pool.endpoints().count(), 0);
    }

    #[test]
    fn add_servers_stops_on_bad_spec() {
        let mut pool: ServerPool = ServerPool::new();
        let err = pool.add_servers(&["127.0.0.1", "127.0.0.1:notaport"]).unwrap_err();
        assert!(matches!(err, GearError::AddressResolution { .. }));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn select_on_empty_pool() {
        let mut pool: ServerPool = ServerPool::new();
        assert!(matches!(
            pool.select(&Deadline::never()).await,
            Err(GearError::NoServers)
        ));
    }

    #[tokio::test]
    async fn select_skips_dead_server() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);
        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = live.local_addr().unwrap().port();

        let mut pool: ServerPool = ServerPool::new();
        pool.add_server("127.0.0.1", dead_port as i32).unwrap();
        pool.add_server("127.0.0.1", live_port as i32).unwrap();

        let deadline = Deadline::after_ms(5_000);
        let picked = pool.select(&deadline).await.unwrap();
        assert_eq!(picked, Selected { index: 1, fresh: true });
        assert!(!pool.phase(0).unwrap().is_healthy());

        // Healthy slot is reused before the failed one is retried.
        let picked = pool.select(&deadline).await.unwrap();
        assert_eq!(picked, Selected { index: 1, fresh: false });
    }

    #[tokio::test]
    async fn all_servers_refused() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = dead.local_addr().unwrap().port();
        drop(dead);

        let mut pool: ServerPool = ServerPool::new();
        pool.add_server("127.0.0.1", port as i32).unwrap();
        assert!(matches!(
            pool.select(&Deadline::after_ms(5_000)).await,
            Err(GearError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn recv_any_reports_source() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b_port = b.local_addr().unwrap().port();

        let mut pool: ServerPool = ServerPool::new();
        pool.add_server("127.0.0.1", a.local_addr().unwrap().port() as i32).unwrap();
        pool.add_server("127.0.0.1", b_port as i32).unwrap();
        let opened = pool.connect_all(&Deadline::after_ms(5_000)).await.unwrap();
        assert_eq!(opened, vec![0, 1]);

        let (_a_stream, _) = a.accept().await.unwrap();
        let (b_stream, _) = b.accept().await.unwrap();
        let mut b_conn = crate::network::JobConnection::new(b_stream, "client");
        b_conn
            .send(Packet::response(Command::Noop, &[]).unwrap())
            .await
            .unwrap();

        let (index, item) = pool.recv_any(&Deadline::after_ms(5_000)).await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(item.unwrap().command(), Command::Noop);

        let quiet = pool.recv_any(&Deadline::after_ms(50)).await;
        assert!(matches!(quiet, Err(GearError::Timeout(_))));
    }
}
