//! The client engine: submits jobs and tracks them to completion.
//!
//! Jobs are either queued with `add_task*` and driven together by
//! [`Client::run_tasks`], or run one at a time with the `do_*` methods.
//! Replies from every server are consumed in arrival order and each one
//! fires at most one callback.

mod callbacks;
mod tracker;

pub use callbacks::{TaskCallback, TaskEvent};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DEFAULT_CLIENT_TIMEOUT_MS;
use crate::error::{GearError, Result};
use crate::flags::ClientOptions;
use crate::message::Command;
use crate::network::{Deadline, ServerEndpoint, ServerPool};
use crate::packet::Packet;
use crate::serializer::{Serializer, default_serializer};
use crate::task::{JobMode, Priority, Task, TaskFailure, TaskId};

use callbacks::Callbacks;
use tracker::TaskTracker;

/// Reply to a `GET_STATUS` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub handle: String,
    pub known: bool,
    pub running: bool,
    pub numerator: u32,
    pub denominator: u32,
}

// ── Client ───────────────────────────────────────────────────────

/// Job-submitting side of the protocol.
///
/// Cloning copies the server list, options, serializer and timeout. The
/// clone starts with no connections, no queued tasks and no callbacks.
#[derive(Debug)]
pub struct Client {
    core: Core,
    queue: TaskTracker,
    timeout_ms: i64,
}

/// Everything `run_tasks` needs besides the queue itself, so the two can
/// be borrowed independently.
struct Core {
    pool: ServerPool,
    options: ClientOptions,
    serializer: Arc<dyn Serializer>,
    callbacks: Callbacks,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("pool", &self.pool)
            .field("options", &self.options)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Client {
    fn clone(&self) -> Self {
        Self {
            core: Core {
                pool: self.core.pool.clone_endpoints(),
                options: self.core.options,
                serializer: Arc::clone(&self.core.serializer),
                callbacks: Callbacks::default(),
            },
            queue: TaskTracker::default(),
            timeout_ms: self.timeout_ms,
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            core: Core {
                pool: ServerPool::new(),
                options: ClientOptions::default(),
                serializer: default_serializer(),
                callbacks: Callbacks::default(),
            },
            queue: TaskTracker::default(),
            timeout_ms: DEFAULT_CLIENT_TIMEOUT_MS,
        }
    }

    // ── Servers ──────────────────────────────────────────────────

    /// Add a job server. A non-positive port selects the default.
    pub fn add_server(&mut self, host: &str, port: i32) -> Result<()> {
        self.core.pool.add_server(host, port)
    }

    /// Add servers given as `host[:port]` specs.
    pub fn add_servers<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        self.core.pool.add_servers(specs)
    }

    /// Forget all servers. Unfinished tasks go back to the queue.
    pub fn remove_servers(&mut self) {
        self.queue.lost_all();
        self.core.pool.remove_all();
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.core.pool.endpoints()
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Timeout in milliseconds; negative waits forever.
    pub fn timeout(&self) -> i64 {
        self.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: i64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn options(&self) -> ClientOptions {
        self.core.options
    }

    /// Options affect connections opened after the change.
    pub fn set_options(&mut self, options: ClientOptions) {
        self.core.options = options;
    }

    pub fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.core.serializer = serializer;
    }

    // ── Callbacks ────────────────────────────────────────────────

    pub fn set_created_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Created, Box::new(f));
    }

    pub fn set_data_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Data, Box::new(f));
    }

    pub fn set_warning_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Warning, Box::new(f));
    }

    pub fn set_status_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Status, Box::new(f));
    }

    pub fn set_complete_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Complete, Box::new(f));
    }

    pub fn set_exception_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Exception, Box::new(f));
    }

    pub fn set_fail_fn(&mut self, f: impl FnMut(&Task) + Send + 'static) {
        self.core.callbacks.set(TaskEvent::Fail, Box::new(f));
    }

    /// Remove every callback.
    pub fn clear_fn(&mut self) {
        self.core.callbacks.clear();
    }

    // ── Queued submission ────────────────────────────────────────

    pub fn add_task(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::Normal, JobMode::Foreground)
    }

    pub fn add_task_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::Normal, JobMode::Background)
    }

    pub fn add_task_high(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::High, JobMode::Foreground)
    }

    pub fn add_task_high_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::High, JobMode::Background)
    }

    pub fn add_task_low(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::Low, JobMode::Foreground)
    }

    pub fn add_task_low_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<TaskId> {
        self.enqueue(function, workload.as_ref(), unique, Priority::Low, JobMode::Background)
    }

    fn enqueue(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        mode: JobMode,
    ) -> Result<TaskId> {
        let task = self.core.make_task(function, workload, unique, priority, mode)?;
        debug!(task = %task.id(), function, "task queued");
        Ok(self.queue.track(task))
    }

    /// Queued tasks, including those left behind by a timed-out run.
    pub fn tasks(&self) -> &[Task] {
        self.queue.tasks()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.queue.get(id)
    }

    /// Submit every queued task and wait until each foreground task has
    /// finished and each background task has a handle.
    ///
    /// On success the queue is drained and its tasks returned. On error
    /// (timeout, lost connection) the tasks stay queued in their
    /// last-known state and the next call picks up where this one left.
    pub async fn run_tasks(&mut self) -> Result<Vec<Task>> {
        if self.queue.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = Deadline::after_ms(self.timeout_ms);
        let pending = self.queue.unsubmitted();
        self.core.drive(&mut self.queue, &pending, None, &deadline).await?;
        let tasks = self.queue.drain();
        info!(count = tasks.len(), "tasks finished");
        Ok(tasks)
    }

    // ── Immediate submission ─────────────────────────────────────

    /// Run one foreground job now, bypassing the queue.
    pub async fn do_job(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::Normal, JobMode::Foreground).await
    }

    /// Submit one background job now; returns once it has a handle.
    pub async fn do_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::Normal, JobMode::Background).await
    }

    pub async fn do_high(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::High, JobMode::Foreground).await
    }

    pub async fn do_high_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::High, JobMode::Background).await
    }

    pub async fn do_low(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::Low, JobMode::Foreground).await
    }

    pub async fn do_low_background(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        self.run_one(function, workload.as_ref(), unique, Priority::Low, JobMode::Background).await
    }

    /// Like [`do_job`](Self::do_job), but a client without servers is
    /// reported as `UnknownState`: there is nothing to execute against.
    pub async fn execute(&mut self, function: &str, workload: impl AsRef<[u8]>, unique: Option<&str>) -> Result<Task> {
        if self.core.pool.is_empty() {
            return Err(GearError::UnknownState(
                "execute called on a client with no servers".into(),
            ));
        }
        self.do_job(function, workload, unique).await
    }

    async fn run_one(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        mode: JobMode,
    ) -> Result<Task> {
        if self.core.pool.is_empty() {
            return Err(GearError::NoServers);
        }
        let task = self.core.make_task(function, workload, unique, priority, mode)?;
        let deadline = Deadline::after_ms(self.timeout_ms);

        // Tracked with the queue so replies for earlier queued tasks that
        // arrive meanwhile still find their task.
        let id = self.queue.track(task);
        if let Err(e) = self.core.drive(&mut self.queue, &[id], Some(id), &deadline).await {
            if let Some(server) = self.queue.awaiting_server(id) {
                // The JOB_CREATED still owed on this connection would be
                // matched against a later submission.
                self.queue.lost(server);
                self.core.pool.mark_failed(server, &e);
            }
            self.queue.take(id);
            return Err(e);
        }
        self.queue
            .take(id)
            .ok_or_else(|| GearError::UnknownState(format!("{id} vanished while running")))
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Ask the servers about a job handle. The first server that knows
    /// the job answers; otherwise the last "unknown" reply is returned.
    pub async fn job_status(&mut self, handle: &str) -> Result<JobStatus> {
        if self.core.pool.is_empty() {
            return Err(GearError::NoServers);
        }
        let deadline = Deadline::after_ms(self.timeout_ms);

        let mut answer = None;
        let mut last_err = None;
        for server in 0..self.core.pool.len() {
            match self.core.status_from(&mut self.queue, server, handle, &deadline).await {
                Ok(status) if status.known => return Ok(status),
                Ok(status) => answer = Some(status),
                Err(e @ GearError::Timeout(_)) => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        answer.ok_or_else(|| last_err.unwrap_or(GearError::NoServers))
    }

    /// Send `payload` to every server and check each echoes it back.
    pub async fn echo(&mut self, payload: impl AsRef<[u8]>) -> Result<()> {
        if self.core.pool.is_empty() {
            return Err(GearError::NoServers);
        }
        let deadline = Deadline::after_ms(self.timeout_ms);
        for server in 0..self.core.pool.len() {
            self.core
                .echo_on(&mut self.queue, server, payload.as_ref(), &deadline)
                .await?;
        }
        Ok(())
    }
}

// ── Core ─────────────────────────────────────────────────────────

impl Core {
    fn make_task(
        &self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        mode: JobMode,
    ) -> Result<Task> {
        if function.is_empty() || function.contains('\0') {
            return Err(GearError::InvalidArgument(format!(
                "invalid function name {function:?}"
            )));
        }
        let unique = match unique {
            Some(u) if u.contains('\0') => {
                return Err(GearError::InvalidArgument(format!("invalid unique id {u:?}")));
            }
            Some(u) => u.to_string(),
            None if self.options.contains(ClientOptions::GENERATE_UNIQUE) => {
                uuid::Uuid::new_v4().to_string()
            }
            None => String::new(),
        };
        let workload = self.serializer.dumps(workload)?;
        Ok(Task::new(function, unique, workload, priority, mode))
    }

    /// Submit `submit`, then read replies until `target` is settled, or
    /// every task in `queue` when there is no target.
    async fn drive(
        &mut self,
        queue: &mut TaskTracker,
        submit: &[TaskId],
        target: Option<TaskId>,
        deadline: &Deadline,
    ) -> Result<()> {
        if self.pool.is_empty() {
            return Err(GearError::NoServers);
        }

        for &id in submit {
            self.submit(queue, id, deadline).await?;
        }

        loop {
            let done = match target {
                Some(id) => queue.is_settled(id),
                None => queue.all_settled(),
            };
            if done {
                break;
            }
            let (server, item) = self.pool.recv_any(deadline).await?;
            match item {
                Ok(packet) => self.dispatch(queue, server, packet)?,
                Err(e) => {
                    let reset = queue.lost(server);
                    warn!(server, reset, "connection lost with tasks outstanding");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn submit(&mut self, queue: &mut TaskTracker, id: TaskId, deadline: &Deadline) -> Result<()> {
        let selected = self.pool.select(deadline).await?;
        if selected.fresh {
            self.negotiate(queue, selected.index, deadline).await?;
        }

        let packet = {
            let task = queue
                .get(id)
                .ok_or_else(|| GearError::UnknownState(format!("{id} is not queued")))?;
            Packet::request(
                Command::submit(task.priority(), task.mode()),
                &[task.function_name().as_bytes(), task.unique().as_bytes(), task.workload()],
            )?
        };
        let command = packet.command();

        if let Err(e) = self.pool.send(selected.index, packet, deadline).await {
            queue.lost(selected.index);
            return Err(e);
        }
        queue.submitted(id, selected.index);
        debug!(task = %id, server = selected.index, %command, "submitted");
        Ok(())
    }

    /// Per-connection setup sent once, right after connecting.
    async fn negotiate(&mut self, queue: &mut TaskTracker, server: usize, deadline: &Deadline) -> Result<()> {
        if self.options.contains(ClientOptions::EXCEPTIONS) {
            let packet = Packet::request(Command::OptionReq, &[b"exceptions"])?;
            if let Err(e) = self.pool.send(server, packet, deadline).await {
                queue.lost(server);
                return Err(e);
            }
            queue.option_sent(server);
        }
        Ok(())
    }

    /// Apply one server packet to the tasks in `queue`.
    fn dispatch(&mut self, queue: &mut TaskTracker, server: usize, packet: Packet) -> Result<()> {
        let command = packet.command();
        match command {
            Command::JobCreated => {
                let handle = packet.arg_str(0)?.to_string();
                match queue.created(server, handle.clone()) {
                    Some(id) => self.fire(queue, id, TaskEvent::Created),
                    None => warn!(server, %handle, "JOB_CREATED with no submission waiting"),
                }
            }

            Command::WorkData
            | Command::WorkWarning
            | Command::WorkStatus
            | Command::WorkComplete
            | Command::WorkFail
            | Command::WorkException => {
                let handle = packet.arg_str(0)?;
                let Some(id) = queue.lookup(server, handle) else {
                    debug!(server, handle, %command, "packet for unknown handle ignored");
                    return Ok(());
                };
                let event = self.apply_work(queue, id, &packet)?;
                if event.is_terminal() {
                    queue.finish(server, handle);
                }
                self.fire(queue, id, event);
            }

            Command::Error => {
                let code = String::from_utf8_lossy(packet.arg(0)).into_owned();
                let message = String::from_utf8_lossy(packet.arg(1)).into_owned();
                if queue.option_answered(server) {
                    warn!(server, %code, %message, "server refused option");
                } else if let Some(id) = queue.pop_awaiting(server) {
                    warn!(task = %id, %code, %message, "submission rejected");
                    if let Some(task) = queue.get_mut(id) {
                        task.fail(Some(TaskFailure { code, message }));
                    }
                    self.fire(queue, id, TaskEvent::Fail);
                } else {
                    return Err(GearError::ServerError { code, message });
                }
            }

            Command::OptionRes => {
                if !queue.option_answered(server) {
                    debug!(server, "unsolicited OPTION_RES");
                }
            }

            Command::Noop => {}

            other => debug!(server, %other, "unexpected packet ignored"),
        }
        Ok(())
    }

    /// Update the task for a `WORK_*` packet and return the event to fire.
    /// Payloads the serializer rejects fail the task.
    fn apply_work(&mut self, queue: &mut TaskTracker, id: TaskId, packet: &Packet) -> Result<TaskEvent> {
        let unbuffered = self.options.contains(ClientOptions::UNBUFFERED_RESULT);
        let serializer = Arc::clone(&self.serializer);
        let task = queue
            .get_mut(id)
            .ok_or_else(|| GearError::UnknownState(format!("{id} is not queued")))?;

        let loaded = match packet.command() {
            Command::WorkData | Command::WorkWarning | Command::WorkComplete => {
                match serializer.loads(packet.payload()) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(task = %id, "cannot load payload: {e}");
                        task.fail(Some(TaskFailure {
                            code: "SERIALIZATION".into(),
                            message: e.to_string(),
                        }));
                        return Ok(TaskEvent::Fail);
                    }
                }
            }
            _ => None,
        };

        let event = match (packet.command(), loaded) {
            (Command::WorkData, Some(bytes)) => {
                task.push_data(bytes, unbuffered);
                TaskEvent::Data
            }
            (Command::WorkWarning, Some(bytes)) => {
                task.push_warning(bytes);
                TaskEvent::Warning
            }
            (Command::WorkComplete, Some(bytes)) => {
                task.complete(bytes);
                TaskEvent::Complete
            }
            (Command::WorkStatus, _) => {
                task.progress(parse_u32(packet, 1)?, parse_u32(packet, 2)?);
                TaskEvent::Status
            }
            (Command::WorkException, _) => {
                task.raise(packet.payload().to_vec());
                TaskEvent::Exception
            }
            _ => {
                task.fail(None);
                TaskEvent::Fail
            }
        };
        Ok(event)
    }

    fn fire(&mut self, queue: &TaskTracker, id: TaskId, event: TaskEvent) {
        if let Some(task) = queue.get(id) {
            debug!(task = %id, ?event, state = %task.state(), "task event");
            self.callbacks.fire(event, task);
        }
    }

    /// Read from `server` until a `expected` packet arrives, applying
    /// anything else to `queue` on the way.
    async fn await_reply(
        &mut self,
        queue: &mut TaskTracker,
        server: usize,
        expected: Command,
        deadline: &Deadline,
    ) -> Result<Packet> {
        loop {
            let packet = match self.pool.recv(server, deadline).await {
                Ok(packet) => packet,
                Err(e) => {
                    if !matches!(e, GearError::Timeout(_)) {
                        queue.lost(server);
                    }
                    return Err(e);
                }
            };
            if packet.command() == expected {
                return Ok(packet);
            }
            self.dispatch(queue, server, packet)?;
        }
    }

    /// Connect to `server`, running setup if the connection is new.
    async fn ensure(&mut self, queue: &mut TaskTracker, server: usize, deadline: &Deadline) -> Result<()> {
        if self.pool.connect(server, deadline).await? {
            self.negotiate(queue, server, deadline).await?;
        }
        Ok(())
    }

    async fn status_from(
        &mut self,
        queue: &mut TaskTracker,
        server: usize,
        handle: &str,
        deadline: &Deadline,
    ) -> Result<JobStatus> {
        self.ensure(queue, server, deadline).await?;
        let request = Packet::request(Command::GetStatus, &[handle.as_bytes()])?;
        if let Err(e) = self.pool.send(server, request, deadline).await {
            queue.lost(server);
            return Err(e);
        }

        let reply = self.await_reply(queue, server, Command::StatusRes, deadline).await?;
        Ok(JobStatus {
            handle: reply.arg_str(0)?.to_string(),
            known: reply.arg(1) == b"1",
            running: reply.arg(2) == b"1",
            numerator: parse_u32(&reply, 3)?,
            denominator: parse_u32(&reply, 4)?,
        })
    }

    async fn echo_on(&mut self, queue: &mut TaskTracker, server: usize, payload: &[u8], deadline: &Deadline) -> Result<()> {
        self.ensure(queue, server, deadline).await?;
        let request = Packet::request(Command::EchoReq, &[payload])?;
        if let Err(e) = self.pool.send(server, request, deadline).await {
            queue.lost(server);
            return Err(e);
        }

        let reply = self.await_reply(queue, server, Command::EchoRes, deadline).await?;
        if reply.payload() != payload {
            return Err(GearError::EchoMismatch);
        }
        Ok(())
    }
}

fn parse_u32(packet: &Packet, index: usize) -> Result<u32> {
    let text = packet.arg_str(index)?;
    if text.is_empty() {
        return Ok(0);
    }
    text.trim().parse().map_err(|_| {
        GearError::MalformedPacket(format!(
            "{} argument {index} is not a number: {text:?}",
            packet.command()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn do_job_without_servers() {
        let mut client = Client::new();
        assert!(matches!(
            client.do_job("reverse", b"abc", None).await,
            Err(GearError::NoServers)
        ));
        assert!(matches!(
            client.do_background("reverse", b"abc", None).await,
            Err(GearError::NoServers)
        ));
    }

    #[tokio::test]
    async fn queued_tasks_fail_at_run_without_servers() {
        let mut client = Client::new();
        let id = client.add_task("reverse", b"abc", None).unwrap();
        client.add_task_low_background("reverse", b"def", None).unwrap();
        assert!(matches!(client.run_tasks().await, Err(GearError::NoServers)));
        assert_eq!(client.tasks().len(), 2);
        assert_eq!(client.task(id).unwrap().function_name(), "reverse");
    }

    #[tokio::test]
    async fn execute_without_servers_is_unknown_state() {
        let mut client = Client::new();
        assert!(matches!(
            client.execute("reverse", b"abc", None).await,
            Err(GearError::UnknownState(_))
        ));
    }

    #[tokio::test]
    async fn remove_servers_restores_initial_behaviour() {
        let mut client = Client::new();
        client.add_server("127.0.0.1", -1).unwrap();
        client.remove_servers();
        assert_eq!(client.servers().count(), 0);
        assert!(matches!(
            client.do_job("reverse", b"abc", None).await,
            Err(GearError::NoServers)
        ));
    }

    #[tokio::test]
    async fn empty_queue_runs_trivially() {
        let mut client = Client::new();
        assert!(client.run_tasks().await.unwrap().is_empty());
    }

    #[test]
    fn unresolvable_host() {
        let mut client = Client::new();
        assert!(matches!(
            client.add_server("invalidhosturi", -1),
            Err(GearError::AddressResolution { .. })
        ));
    }

    #[test]
    fn timeout_is_idempotent_and_cloned_independently() {
        let mut client = Client::new();
        assert_eq!(client.timeout(), DEFAULT_CLIENT_TIMEOUT_MS);
        client.set_timeout(30);
        client.set_timeout(30);
        assert_eq!(client.timeout(), 30);

        let mut copy = client.clone();
        assert_eq!(copy.timeout(), 30);
        assert_eq!(copy.options(), client.options());
        copy.set_timeout(500);
        assert_eq!(client.timeout(), 30);
        assert_eq!(copy.timeout(), 500);
    }

    #[test]
    fn clone_starts_with_empty_queue() {
        let mut client = Client::new();
        client.add_server("127.0.0.1", 4730).unwrap();
        client.add_task("reverse", b"x", None).unwrap();
        let copy = client.clone();
        assert!(copy.tasks().is_empty());
        assert_eq!(copy.servers().count(), 1);
    }

    #[test]
    fn unique_generation_follows_options() {
        let mut client = Client::new();
        let id = client.add_task("f", b"", None).unwrap();
        assert_eq!(client.task(id).unwrap().unique().len(), 36);

        let id = client.add_task("f", b"", Some("mine")).unwrap();
        assert_eq!(client.task(id).unwrap().unique(), "mine");

        client.set_options(ClientOptions::EXCEPTIONS);
        let id = client.add_task("f", b"", None).unwrap();
        assert_eq!(client.task(id).unwrap().unique(), "");
    }

    #[test]
    fn invalid_names_rejected() {
        let mut client = Client::new();
        assert!(matches!(
            client.add_task("", b"", None),
            Err(GearError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.add_task("f", b"", Some("a\0b")),
            Err(GearError::InvalidArgument(_))
        ));
    }

    #[test]
    fn serializer_applies_on_enqueue() {
        let mut client = Client::new();
        client.set_serializer(Arc::new(crate::serializer::Utf8Text));
        assert!(matches!(
            client.add_task("f", b"\xff", None),
            Err(GearError::Serialization(_))
        ));
    }

    #[test]
    fn dispatch_drives_callbacks_in_order() {
        use std::sync::Mutex;

        let mut client = Client::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        for event in TaskEvent::ALL {
            let events = events.clone();
            client
                .core
                .callbacks
                .set(event, Box::new(move |_| events.lock().unwrap().push(event)));
        }

        let id = client.add_task("reverse", b"abc", None).unwrap();
        client.queue.submitted(id, 0);

        let replies = [
            Packet::response(Command::JobCreated, &[b"H:1"]).unwrap(),
            Packet::response(Command::WorkStatus, &[b"H:1", b"1", b"2"]).unwrap(),
            Packet::response(Command::WorkData, &[b"H:1", b"c"]).unwrap(),
            Packet::response(Command::WorkWarning, &[b"H:1", b"careful"]).unwrap(),
            Packet::response(Command::WorkComplete, &[b"H:1", b"cba"]).unwrap(),
            Packet::response(Command::WorkFail, &[b"H:1"]).unwrap(),
        ];
        for packet in replies {
            client.core.dispatch(&mut client.queue, 0, packet).unwrap();
        }

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                TaskEvent::Created,
                TaskEvent::Status,
                TaskEvent::Data,
                TaskEvent::Warning,
                TaskEvent::Complete
            ]
        );
        let task = client.task(id).unwrap();
        assert_eq!(task.result(), b"cba");
        assert_eq!(task.warning(), Some(&b"careful"[..]));
        assert!(client.queue.all_settled());
    }

    #[test]
    fn error_reply_fails_oldest_submission() {
        let mut client = Client::new();
        let first = client.add_task("f", b"1", None).unwrap();
        let second = client.add_task("f", b"2", None).unwrap();
        client.queue.submitted(first, 0);
        client.queue.submitted(second, 0);

        let error = Packet::response(Command::Error, &[b"ERR_QUEUE_FULL", b"queue full"]).unwrap();
        client.core.dispatch(&mut client.queue, 0, error).unwrap();

        let task = client.task(first).unwrap();
        assert_eq!(task.state(), crate::task::TaskState::Failed);
        assert_eq!(task.failure().unwrap().code, "ERR_QUEUE_FULL");
        assert_eq!(client.task(second).unwrap().state(), crate::task::TaskState::Submitted);
    }

    #[test]
    fn unattributable_error_surfaces() {
        let mut client = Client::new();
        let error = Packet::response(Command::Error, &[b"ERR_UNKNOWN", b"huh"]).unwrap();
        assert!(matches!(
            client.core.dispatch(&mut client.queue, 0, error),
            Err(GearError::ServerError { .. })
        ));
    }
}
