//! Text administration protocol.
//!
//! An [`Admin`] session talks to one server. Each operation writes one
//! command line and reads either a single `OK ...` line or a block of rows
//! closed by a line holding only `.`. `ERR code message` replies surface
//! as [`GearError::ServerError`].

use tracing::debug;

use crate::codec::LineCodec;
use crate::config::{DEFAULT_ADMIN_TIMEOUT_MS, DEFAULT_PORT, VerboseLevel};
use crate::error::{GearError, Result};
use crate::network::{Deadline, ServerPool};

/// One row of `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionStatus {
    pub function: String,
    pub total: u32,
    pub running: u32,
    pub available_workers: u32,
}

/// One row of `workers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub fd: i64,
    pub ip: String,
    /// `-` when the worker never set one.
    pub client_id: String,
    pub functions: Vec<String>,
}

/// One row of `show jobs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub handle: String,
    pub retries: u32,
    pub ignore_job: bool,
    pub job_queued: bool,
}

/// Where a session points and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminInfo {
    pub host: Option<String>,
    pub port: u16,
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Line,
    Block,
}

// ── Admin ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Admin {
    /// Holds at most one endpoint.
    pool: ServerPool<LineCodec>,
    timeout_ms: i64,
}

impl Default for Admin {
    fn default() -> Self {
        Self {
            pool: ServerPool::new(),
            timeout_ms: DEFAULT_ADMIN_TIMEOUT_MS,
        }
    }
}

impl Clone for Admin {
    /// Same endpoint and timeout, not connected.
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone_endpoints(),
            timeout_ms: self.timeout_ms,
        }
    }
}

impl Admin {
    /// Session for `host:port`; a non-positive port selects the default.
    /// Nothing is connected until the first command.
    pub fn new(host: &str, port: i32) -> Result<Self> {
        let mut admin = Self::default();
        admin.set_server(host, port)?;
        Ok(admin)
    }

    /// Point the session at another server, dropping any connection.
    pub fn set_server(&mut self, host: &str, port: i32) -> Result<()> {
        let mut pool = ServerPool::new();
        pool.add_server(host, port)?;
        self.pool = pool;
        Ok(())
    }

    pub fn timeout(&self) -> i64 {
        self.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: i64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn info(&self) -> AdminInfo {
        let endpoint = self.pool.endpoint(0);
        AdminInfo {
            host: endpoint.map(|e| e.host().to_string()),
            port: endpoint.map_or(DEFAULT_PORT, |e| e.port()),
            timeout_ms: self.timeout_ms,
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    pub async fn status(&mut self) -> Result<Vec<FunctionStatus>> {
        let rows = self.request("status", Reply::Block).await?;
        rows.iter().filter_map(|row| parse_status(row).transpose()).collect()
    }

    pub async fn workers(&mut self) -> Result<Vec<WorkerInfo>> {
        let rows = self.request("workers", Reply::Block).await?;
        rows.iter().filter_map(|row| parse_worker(row).transpose()).collect()
    }

    pub async fn show_jobs(&mut self) -> Result<Vec<JobInfo>> {
        let rows = self.request("show jobs", Reply::Block).await?;
        rows.iter().filter_map(|row| parse_job(row).transpose()).collect()
    }

    /// Unique ids of queued jobs.
    pub async fn show_unique_jobs(&mut self) -> Result<Vec<String>> {
        let rows = self.request("show unique jobs", Reply::Block).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.trim().to_string())
            .filter(|row| !row.is_empty())
            .collect())
    }

    pub async fn version(&mut self) -> Result<String> {
        self.single("version").await
    }

    pub async fn verbose(&mut self) -> Result<VerboseLevel> {
        self.single("verbose").await?.parse()
    }

    pub async fn getpid(&mut self) -> Result<u32> {
        let pid = self.single("getpid").await?;
        pid.parse()
            .map_err(|_| GearError::MalformedPacket(format!("getpid returned {pid:?}")))
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn create_function(&mut self, name: &str) -> Result<()> {
        let line = format!("create function {}", word(name)?);
        self.single(&line).await.map(drop)
    }

    pub async fn drop_function(&mut self, name: &str) -> Result<()> {
        let line = format!("drop function {}", word(name)?);
        self.single(&line).await.map(drop)
    }

    /// Limit the queue for `name`; a negative size removes the limit.
    pub async fn maxqueue(&mut self, name: &str, size: i32) -> Result<()> {
        let line = format!("maxqueue {} {size}", word(name)?);
        self.single(&line).await.map(drop)
    }

    pub async fn cancel_job(&mut self, handle: &str) -> Result<()> {
        let line = format!("cancel job {}", word(handle)?);
        self.single(&line).await.map(drop)
    }

    /// Stop the server. With `graceful` it first finishes running jobs.
    /// The server closes the connection afterwards.
    pub async fn shutdown(&mut self, graceful: bool) -> Result<()> {
        let line = if graceful { "shutdown graceful" } else { "shutdown" };
        self.single(line).await?;
        self.pool.disconnect_all();
        Ok(())
    }

    // ── Plumbing ─────────────────────────────────────────────────

    /// Send a command with a one-line reply and return the text after `OK`.
    async fn single(&mut self, line: &str) -> Result<String> {
        let rows = self.request(line, Reply::Line).await?;
        let reply = rows.into_iter().next().unwrap_or_default();
        Ok(strip_ok(&reply).to_string())
    }

    async fn request(&mut self, line: &str, reply: Reply) -> Result<Vec<String>> {
        if self.pool.is_empty() {
            return Err(GearError::NoServers);
        }
        let deadline = Deadline::after_ms(self.timeout_ms);
        let result = self.exchange(line, reply, &deadline).await;
        if let Err(e) = &result {
            // A half-read reply leaves the stream out of step.
            if !matches!(e, GearError::ServerError { .. }) && self.pool.is_connected(0) {
                self.pool.mark_failed(0, e);
            }
        }
        result
    }

    async fn exchange(&mut self, line: &str, reply: Reply, deadline: &Deadline) -> Result<Vec<String>> {
        self.pool.connect(0, deadline).await?;
        debug!(command = line, "admin request");
        self.pool.send(0, line.to_string(), deadline).await?;

        let first = self.pool.recv(0, deadline).await?;
        if let Some(err) = server_error(&first) {
            return Err(err);
        }
        if reply == Reply::Line {
            return Ok(vec![first]);
        }

        let mut rows = Vec::new();
        let mut row = first;
        while row != "." {
            rows.push(row);
            row = self.pool.recv(0, deadline).await?;
        }
        Ok(rows)
    }
}

// ── Reply parsing ────────────────────────────────────────────────

/// Admin arguments are space-separated words.
fn word(arg: &str) -> Result<&str> {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        return Err(GearError::InvalidArgument(format!(
            "admin argument must be a single word: {arg:?}"
        )));
    }
    Ok(arg)
}

fn strip_ok(line: &str) -> &str {
    match line.strip_prefix("OK") {
        Some(rest) => rest.trim_start(),
        None => line.trim(),
    }
}

/// `ERR code message`, or a bare `ERR`. Rows that merely start with the
/// letters (a function named `ERRORS`) are data.
fn server_error(line: &str) -> Option<GearError> {
    let rest = match line.strip_prefix("ERR")? {
        "" => "",
        rest => rest.strip_prefix(' ')?,
    };
    let mut parts = rest.trim_start().splitn(2, ' ');
    let code = parts.next().unwrap_or_default().to_string();
    let message = parts.next().unwrap_or_default().replace('+', " ");
    Some(GearError::ServerError { code, message })
}

fn number(field: &str, row: &str) -> Result<u32> {
    field
        .trim()
        .parse()
        .map_err(|_| GearError::MalformedPacket(format!("bad number {field:?} in {row:?}")))
}

/// `function\ttotal\trunning\tavailable_workers`; shorter rows are skipped.
fn parse_status(row: &str) -> Result<Option<FunctionStatus>> {
    let fields: Vec<&str> = row.split('\t').collect();
    if fields.len() < 4 {
        return Ok(None);
    }
    Ok(Some(FunctionStatus {
        function: fields[0].to_string(),
        total: number(fields[1], row)?,
        running: number(fields[2], row)?,
        available_workers: number(fields[3], row)?,
    }))
}

/// `fd ip client_id : fn1 fn2 ...`
fn parse_worker(row: &str) -> Result<Option<WorkerInfo>> {
    let tokens: Vec<&str> = row.split_whitespace().collect();
    if tokens.len() < 4 || tokens[3] != ":" {
        return Ok(None);
    }
    let fd = tokens[0]
        .parse()
        .map_err(|_| GearError::MalformedPacket(format!("bad fd in {row:?}")))?;
    Ok(Some(WorkerInfo {
        fd,
        ip: tokens[1].to_string(),
        client_id: tokens[2].to_string(),
        functions: tokens[4..].iter().map(|f| f.to_string()).collect(),
    }))
}

/// `handle\tretries\tignore_job\tjob_queued`
fn parse_job(row: &str) -> Result<Option<JobInfo>> {
    let fields: Vec<&str> = row.split('\t').collect();
    if fields.len() < 4 {
        return Ok(None);
    }
    Ok(Some(JobInfo {
        handle: fields[0].to_string(),
        retries: number(fields[1], row)?,
        ignore_job: number(fields[2], row)? != 0,
        job_queued: number(fields[3], row)? != 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let admin = Admin::default();
        assert_eq!(
            admin.info(),
            AdminInfo {
                host: None,
                port: 4730,
                timeout_ms: 60_000
            }
        );
    }

    #[test]
    fn set_server_and_timeout() {
        let mut admin = Admin::new("127.0.0.1", -1).unwrap();
        admin.set_server("127.0.0.1", 1234).unwrap();
        admin.set_timeout(10);
        let info = admin.info();
        assert_eq!(info.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(info.port, 1234);
        assert_eq!(info.timeout_ms, 10);
        assert_eq!(admin.clone().info(), info);
    }

    #[tokio::test]
    async fn no_server_configured() {
        let mut admin = Admin::default();
        assert!(matches!(admin.status().await, Err(GearError::NoServers)));
    }

    #[test]
    fn status_rows() {
        let row = parse_status("reverse\t3\t1\t2").unwrap().unwrap();
        assert_eq!(
            row,
            FunctionStatus {
                function: "reverse".into(),
                total: 3,
                running: 1,
                available_workers: 2
            }
        );
        assert_eq!(parse_status("short\t1").unwrap(), None);
        assert!(matches!(
            parse_status("f\tx\t0\t0"),
            Err(GearError::MalformedPacket(_))
        ));
    }

    #[test]
    fn worker_rows() {
        let row = parse_worker("33 127.0.0.1 worker-7 : reverse upper").unwrap().unwrap();
        assert_eq!(row.fd, 33);
        assert_eq!(row.client_id, "worker-7");
        assert_eq!(row.functions, vec!["reverse", "upper"]);

        let idle = parse_worker("34 ::1 - :").unwrap().unwrap();
        assert!(idle.functions.is_empty());
        assert_eq!(parse_worker("garbage").unwrap(), None);
    }

    #[test]
    fn job_rows() {
        let job = parse_job("H:lap:1\t0\t0\t1").unwrap().unwrap();
        assert!(job.job_queued);
        assert!(!job.ignore_job);
    }

    #[test]
    fn reply_lines() {
        assert_eq!(strip_ok("OK 1.1.19"), "1.1.19");
        assert_eq!(strip_ok("OK"), "");
        assert_eq!(strip_ok("0.24"), "0.24");
        match server_error("ERR UNKNOWN_COMMAND Unknown+server+command") {
            Some(GearError::ServerError { code, message }) => {
                assert_eq!(code, "UNKNOWN_COMMAND");
                assert_eq!(message, "Unknown server command");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(server_error("OK").is_none());
    }

    #[test]
    fn rows_starting_with_err_are_data() {
        assert!(server_error("ERRORS_REPORT\t1\t0\t1").is_none());
        assert!(server_error("ERR\t0\t0\t0").is_none());
        assert!(matches!(
            server_error("ERR"),
            Some(GearError::ServerError { code, .. }) if code.is_empty()
        ));
    }

    #[test]
    fn words_only() {
        assert!(word("foo").is_ok());
        assert!(word("two words").is_err());
        assert!(word("").is_err());
    }
}
