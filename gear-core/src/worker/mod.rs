//! The worker engine: announces functions, grabs jobs and runs handlers.
//!
//! Each call to [`Worker::work`] runs one cycle:
//!
//! 1. connect to every server and (re)announce abilities where stale
//! 2. send `GRAB_JOB_UNIQ` to each server in turn
//! 3. if none has work, send `PRE_SLEEP` everywhere and wait for a `NOOP`
//! 4. run the handler on the blocking pool, writing each effect as it is
//!    sent, then the terminal packet
//!
//! Handler errors and panics fail the job; they never escape `work`.
//! [`Worker::grab_job`] stops after step 3 and leaves the job to the
//! caller, who reports through [`Worker::report`].

mod job;
mod registry;

pub use job::{Job, JobOutcome};
pub use registry::{Handler, HandlerResult};

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_WORKER_TIMEOUT_MS;
use crate::error::{GearError, Result};
use crate::message::Command;
use crate::network::{Deadline, ServerEndpoint, ServerPool};
use crate::packet::Packet;
use crate::serializer::{Serializer, default_serializer};
use crate::state::WorkPhase;

use registry::FunctionRegistry;

pub type ExceptionCallback = Box<dyn FnMut(&GearError) + Send>;

/// Summary of one completed `work()` cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub handle: String,
    pub function: String,
    pub outcome: JobOutcome,
}

/// A job as handed out by `JOB_ASSIGN` / `JOB_ASSIGN_UNIQ`.
struct Assignment {
    server: usize,
    handle: String,
    function: String,
    unique: String,
    workload: Vec<u8>,
}

impl Assignment {
    /// `namespace` is stripped from the function name.
    fn parse(server: usize, packet: Packet, namespace: Option<&str>) -> Result<Self> {
        let command = packet.command();
        let mut args = packet.into_args().into_iter();
        let mut next = || args.next().unwrap_or_default();
        let handle = String::from_utf8(next())?;
        let mut function = String::from_utf8(next())?;
        if let Some(bare) = namespace.and_then(|ns| function.strip_prefix(ns)) {
            function = bare.to_string();
        }
        let unique = match command {
            Command::JobAssignUniq => String::from_utf8(next())?,
            _ => String::new(),
        };
        let workload = next();
        Ok(Self {
            server,
            handle,
            function,
            unique,
            workload,
        })
    }
}

// ── Worker ───────────────────────────────────────────────────────

pub struct Worker {
    pool: ServerPool,
    registry: FunctionRegistry,
    timeout_ms: i64,
    identifier: Option<String>,
    /// Prefix put on every function name sent to the servers.
    namespace: Option<String>,
    serializer: Arc<dyn Serializer>,
    exception_fn: Option<ExceptionCallback>,
    /// Registry revision last announced on each connected server.
    announced: HashMap<usize, u64>,
    phase: WorkPhase,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("pool", &self.pool)
            .field("registry", &self.registry)
            .field("timeout_ms", &self.timeout_ms)
            .field("identifier", &self.identifier)
            .field("namespace", &self.namespace)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Worker {
    /// Same servers, timeout, identifier, namespace and serializer; no
    /// functions, connections or observer.
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone_endpoints(),
            registry: FunctionRegistry::default(),
            timeout_ms: self.timeout_ms,
            identifier: self.identifier.clone(),
            namespace: self.namespace.clone(),
            serializer: Arc::clone(&self.serializer),
            exception_fn: None,
            announced: HashMap::new(),
            phase: WorkPhase::default(),
        }
    }
}

impl Worker {
    pub fn new() -> Self {
        Self {
            pool: ServerPool::new(),
            registry: FunctionRegistry::default(),
            timeout_ms: DEFAULT_WORKER_TIMEOUT_MS,
            identifier: None,
            namespace: None,
            serializer: default_serializer(),
            exception_fn: None,
            announced: HashMap::new(),
            phase: WorkPhase::default(),
        }
    }

    // ── Servers ──────────────────────────────────────────────────

    pub fn add_server(&mut self, host: &str, port: i32) -> Result<()> {
        self.pool.add_server(host, port)
    }

    pub fn add_servers<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        self.pool.add_servers(specs)
    }

    pub fn remove_servers(&mut self) {
        self.pool.remove_all();
        self.announced.clear();
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.pool.endpoints()
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Per-cycle wait for a job, in milliseconds; negative waits forever.
    pub fn timeout(&self) -> i64 {
        self.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: i64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Identify this worker to the servers (`SET_CLIENT_ID`). Sent on the
    /// next cycle.
    pub fn set_identifier(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if id.is_empty() || id.contains(['\0', ' ', '\t', '\n']) {
            return Err(GearError::InvalidArgument(format!("invalid worker id {id:?}")));
        }
        self.identifier = Some(id);
        self.announced.clear();
        Ok(())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Prefix every announced function name with `namespace`, so only
    /// clients submitting under the same prefix reach this worker. An
    /// empty namespace removes the prefix.
    pub fn set_namespace(&mut self, namespace: impl Into<String>) -> Result<()> {
        let namespace = namespace.into();
        if namespace.contains('\0') {
            return Err(GearError::InvalidArgument(format!("invalid namespace {namespace:?}")));
        }
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self.announced.clear();
        Ok(())
    }

    pub fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.serializer = serializer;
    }

    /// Observer for handler failures; the job itself is failed either way.
    pub fn set_exception_fn(&mut self, f: impl FnMut(&GearError) + Send + 'static) {
        self.exception_fn = Some(Box::new(f));
    }

    pub fn phase(&self) -> &WorkPhase {
        &self.phase
    }

    // ── Functions ────────────────────────────────────────────────

    /// Register `name` with a handler. `timeout` is in seconds; 0 lets the
    /// server wait indefinitely.
    pub fn add_function<F>(&mut self, name: &str, timeout: u32, handler: F) -> Result<()>
    where
        F: Fn(&mut Job) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.insert(name, timeout, Arc::new(handler))?;
        debug!(function = name, timeout, "function added");
        Ok(())
    }

    /// Announce `name` without a handler. Jobs for it are failed.
    pub fn register(&mut self, name: &str, timeout: u32) -> Result<()> {
        self.registry.announce(name, timeout)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.registry.remove(name)
    }

    pub fn unregister_all(&mut self) {
        self.registry.clear();
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    // ── Work cycle ───────────────────────────────────────────────

    /// Wait for one job, run it and report the outcome.
    pub async fn work(&mut self) -> Result<JobReport> {
        let assignment = self.acquire().await?;
        let result = self.execute(assignment).await;
        if result.is_err() {
            self.phase.reset();
        }
        result
    }

    /// Wait for one job and hand it over without running a handler. The
    /// caller sends its effects and writes them with [`report`](Self::report).
    pub async fn grab_job(&mut self) -> Result<Job> {
        let Assignment {
            server,
            handle,
            function,
            unique,
            workload,
        } = self.acquire().await?;
        self.phase.hand_off()?;
        info!(server, %handle, %function, "job grabbed");

        let serializer = Arc::clone(&self.serializer);
        match serializer.loads(&workload) {
            Ok(workload) => Ok(Job::new(server, handle, function, unique, workload, serializer)),
            Err(e) => {
                // Nobody can work on it; release the server's record.
                let mut job = Job::new(server, handle, function, unique, Vec::new(), serializer);
                job.send_fail()?;
                self.report(&mut job).await?;
                Err(e)
            }
        }
    }

    /// Write the effects `job` gathered since the last call. Only for jobs
    /// from this worker's [`grab_job`](Self::grab_job).
    pub async fn report(&mut self, job: &mut Job) -> Result<()> {
        let deadline = Deadline::after_ms(self.timeout_ms);
        for packet in job.take_held() {
            self.pool.send(job.server(), packet, &deadline).await?;
        }
        if job.is_finished() {
            debug!(handle = job.handle(), "grabbed job reported");
        }
        Ok(())
    }

    /// Announce, poll and sleep until a server assigns a job.
    async fn acquire(&mut self) -> Result<Assignment> {
        if self.registry.is_empty() {
            return Err(GearError::NoRegisteredFunctions);
        }
        if self.pool.is_empty() {
            return Err(GearError::NoServers);
        }

        self.phase.reset();
        let deadline = Deadline::after_ms(self.timeout_ms);
        let result = self.cycle(&deadline).await;
        if let Err(e) = &result {
            let timed_out = matches!(e, GearError::Timeout(_)) && self.phase.time_out().is_ok();
            if timed_out {
                debug!("no job before timeout");
                self.phase.finish()?;
            } else {
                self.phase.reset();
            }
        }
        result
    }

    async fn cycle(&mut self, deadline: &Deadline) -> Result<Assignment> {
        for index in self.pool.connect_all(deadline).await? {
            self.announced.remove(&index);
        }
        self.announce(deadline).await?;

        self.phase.poll()?;
        loop {
            if let Some(assignment) = self.grab(deadline).await? {
                return Ok(assignment);
            }
            self.phase.sleep()?;
            self.sleep(deadline).await?;
            self.phase.poll()?;
        }
    }

    /// `name` as the servers know it.
    fn qualified(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}{name}"),
            None => name.to_string(),
        }
    }

    /// Bring every connection's abilities up to the current registry.
    async fn announce(&mut self, deadline: &Deadline) -> Result<()> {
        let revision = self.registry.revision();
        let stale: Vec<usize> = self
            .pool
            .connected()
            .filter(|i| self.announced.get(i) != Some(&revision))
            .collect();

        for server in stale {
            let mut packets = vec![Packet::request(Command::ResetAbilities, &[])?];
            for (name, reg) in self.registry.iter() {
                let name = self.qualified(name);
                packets.push(if reg.timeout > 0 {
                    let secs = reg.timeout.to_string();
                    Packet::request(Command::CanDoTimeout, &[name.as_bytes(), secs.as_bytes()])?
                } else {
                    Packet::request(Command::CanDo, &[name.as_bytes()])?
                });
            }
            if let Some(id) = &self.identifier {
                packets.push(Packet::request(Command::SetClientId, &[id.as_bytes()])?);
            }

            let mut sent = true;
            for packet in packets {
                if let Err(e) = self.pool.send(server, packet, deadline).await {
                    if matches!(e, GearError::Timeout(_)) {
                        return Err(e);
                    }
                    sent = false;
                    break;
                }
            }
            if sent {
                self.announced.insert(server, revision);
                debug!(server, revision, "abilities announced");
            } else {
                self.announced.remove(&server);
            }
        }
        self.require_connection()
    }

    /// Ask each server for a job. `None` when every server said `NO_JOB`.
    async fn grab(&mut self, deadline: &Deadline) -> Result<Option<Assignment>> {
        let servers: Vec<usize> = self.pool.connected().collect();
        for server in servers {
            let request = Packet::request(Command::GrabJobUniq, &[])?;
            match self.pool.send(server, request, deadline).await {
                Err(e @ GearError::Timeout(_)) => return Err(e),
                Err(_) => {
                    self.announced.remove(&server);
                    continue;
                }
                Ok(()) => {}
            }

            loop {
                let packet = match self.pool.recv(server, deadline).await {
                    Ok(packet) => packet,
                    Err(e @ GearError::Timeout(_)) => return Err(e),
                    Err(_) => {
                        self.announced.remove(&server);
                        break;
                    }
                };
                match packet.command() {
                    Command::Noop => continue,
                    Command::NoJob => break,
                    Command::JobAssign | Command::JobAssignUniq => {
                        return Assignment::parse(server, packet, self.namespace.as_deref()).map(Some);
                    }
                    Command::Error => {
                        warn!(
                            server,
                            code = %String::from_utf8_lossy(packet.arg(0)),
                            message = %String::from_utf8_lossy(packet.arg(1)),
                            "grab rejected"
                        );
                        break;
                    }
                    other => debug!(server, %other, "unexpected packet while grabbing"),
                }
            }
        }
        self.require_connection()?;
        Ok(None)
    }

    /// Tell every server we are idle and wait for one to wake us.
    async fn sleep(&mut self, deadline: &Deadline) -> Result<()> {
        let servers: Vec<usize> = self.pool.connected().collect();
        for server in servers {
            let request = Packet::request(Command::PreSleep, &[])?;
            match self.pool.send(server, request, deadline).await {
                Err(e @ GearError::Timeout(_)) => return Err(e),
                Err(_) => {
                    self.announced.remove(&server);
                }
                Ok(()) => {}
            }
        }

        loop {
            self.require_connection()?;
            let (server, item) = self.pool.recv_any(deadline).await?;
            match item {
                Ok(packet) if packet.command() == Command::Noop => {
                    debug!(server, "woken up");
                    return Ok(());
                }
                Ok(packet) => debug!(server, command = %packet.command(), "ignored while sleeping"),
                Err(_) => {
                    self.announced.remove(&server);
                }
            }
        }
    }

    async fn execute(&mut self, assignment: Assignment) -> Result<JobReport> {
        let Assignment {
            server,
            handle,
            function,
            unique,
            workload,
        } = assignment;
        self.phase.assign(handle.as_str())?;
        info!(server, %handle, %function, "job assigned");

        let handler = self.registry.get(&function).and_then(|r| r.handler.clone());
        let (workload, load_failure) = match self.serializer.loads(&workload) {
            Ok(bytes) => (bytes, None),
            Err(e) => (Vec::new(), Some(format!("cannot load workload: {e}"))),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut job = Job::new(
            server,
            handle.clone(),
            function.clone(),
            unique,
            workload,
            Arc::clone(&self.serializer),
        );
        job.forward_to(tx)?;

        let mut write_err = None;
        let (mut job, failure) = match (handler, load_failure) {
            (_, Some(reason)) => (job, Some(reason)),
            (None, None) => {
                warn!(%handle, %function, "no handler registered; failing job");
                (job, None)
            }
            (Some(handler), None) => {
                let mut running = tokio::task::spawn_blocking(move || {
                    let failure = run_handler(&handler, &mut job);
                    (job, failure)
                });
                loop {
                    tokio::select! {
                        biased;
                        Some(packet) = rx.recv() => {
                            self.forward(server, packet, &mut write_err).await;
                        }
                        joined = &mut running => {
                            break joined.map_err(|e| {
                                GearError::UnknownState(format!("handler for {handle} did not finish: {e}"))
                            })?;
                        }
                    }
                }
            }
        };
        job.fail_if_open()?;

        self.phase.report()?;
        let outcome = job.into_outcome();
        while let Some(packet) = rx.recv().await {
            self.forward(server, packet, &mut write_err).await;
        }
        if let Some(e) = write_err {
            return Err(e);
        }
        self.phase.finish()?;

        if let Some(reason) = failure {
            let err = GearError::HandlerFailure {
                function: function.clone(),
                handle: handle.clone(),
                reason,
            };
            warn!("{err}");
            if let Some(observer) = self.exception_fn.as_mut() {
                observer(&err);
            }
        }

        let outcome = outcome.unwrap_or(JobOutcome::Failed);
        info!(%handle, %function, success = outcome.is_success(), "job reported");
        Ok(JobReport {
            handle,
            function,
            outcome,
        })
    }

    /// Write one effect packet unless an earlier write for the job failed.
    async fn forward(&mut self, server: usize, packet: Packet, failed: &mut Option<GearError>) {
        if failed.is_some() {
            return;
        }
        let deadline = Deadline::after_ms(self.timeout_ms);
        if let Err(e) = self.pool.send(server, packet, &deadline).await {
            *failed = Some(e);
        }
    }

    fn require_connection(&self) -> Result<()> {
        if self.pool.connected().next().is_none() {
            return Err(GearError::ConnectionFailed {
                endpoint: self
                    .pool
                    .endpoints()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "every server connection was lost",
                ),
            });
        }
        Ok(())
    }

    // ── Utilities ────────────────────────────────────────────────

    /// Send `payload` to every server and check each echoes it back.
    pub async fn echo(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        if self.pool.is_empty() {
            return Err(GearError::NoServers);
        }
        let payload = payload.as_ref();
        let deadline = Deadline::after_ms(self.timeout_ms);
        for server in 0..self.pool.len() {
            if self.pool.connect(server, &deadline).await? {
                self.announced.remove(&server);
            }
            let request = Packet::request(Command::EchoReq, &[payload])?;
            self.pool.send(server, request, &deadline).await?;
            let reply = loop {
                let packet = self.pool.recv(server, &deadline).await?;
                if packet.command() == Command::EchoRes {
                    break packet;
                }
                debug!(server, command = %packet.command(), "skipped while waiting for echo");
            };
            if reply.payload() != payload {
                return Err(GearError::EchoMismatch);
            }
        }
        Ok(())
    }
}

/// Run a handler, turning errors and panics into a failure reason.
/// Successful results complete the job unless it already finished.
fn run_handler(handler: &Handler, job: &mut Job) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(|| handler(job))) {
        Ok(Ok(result)) => {
            if job.is_finished() {
                return None;
            }
            job.send_complete(result).err().map(|e| e.to_string())
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(
            panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string()),
        ),
    }
}
