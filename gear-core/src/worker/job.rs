//! The job a handler is working on, and the effects it sends back.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::{GearError, Result};
use crate::message::Command;
use crate::packet::Packet;
use crate::serializer::Serializer;

/// How a job ended, as reported to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete(Vec<u8>),
    Failed,
    Exception(Vec<u8>),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Where effect packets go.
enum Outbox {
    /// Kept until [`Worker::report`](super::Worker::report) writes them.
    Held(Vec<Packet>),
    /// Handed to the running work cycle, which writes each one at once.
    Live(UnboundedSender<Packet>),
}

/// A job assigned to this worker.
///
/// Handlers read the assignment through the accessors and report progress
/// with the `send_*` methods. Inside [`Worker::work`](super::Worker::work)
/// each effect reaches the server while the handler is still running; a
/// job taken with [`Worker::grab_job`](super::Worker::grab_job) keeps its
/// effects until it is passed to [`Worker::report`](super::Worker::report).
/// After a terminal effect (`send_complete`, `send_fail`, `send_exception`)
/// the job accepts no further effects.
pub struct Job {
    server: usize,
    handle: String,
    function: String,
    unique: String,
    workload: Vec<u8>,
    outbox: Outbox,
    outcome: Option<JobOutcome>,
    serializer: Arc<dyn Serializer>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held = match &self.outbox {
            Outbox::Held(packets) => packets.len(),
            Outbox::Live(_) => 0,
        };
        f.debug_struct("Job")
            .field("server", &self.server)
            .field("handle", &self.handle)
            .field("function", &self.function)
            .field("unique", &self.unique)
            .field("workload_size", &self.workload.len())
            .field("held", &held)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl Job {
    pub(crate) fn new(
        server: usize,
        handle: String,
        function: String,
        unique: String,
        workload: Vec<u8>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            server,
            handle,
            function,
            unique,
            workload,
            outbox: Outbox::Held(Vec::new()),
            outcome: None,
            serializer,
        }
    }

    /// Index of the server that assigned the job.
    pub(crate) fn server(&self) -> usize {
        self.server
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    pub fn unique(&self) -> &str {
        &self.unique
    }

    /// The workload after the worker's serializer loaded it.
    pub fn workload(&self) -> &[u8] {
        &self.workload
    }

    pub fn workload_size(&self) -> usize {
        self.workload.len()
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    // ── Effects ──────────────────────────────────────────────────

    pub fn send_status(&mut self, numerator: u32, denominator: u32) -> Result<()> {
        let (n, d) = (numerator.to_string(), denominator.to_string());
        self.queue(Command::WorkStatus, &[n.as_bytes(), d.as_bytes()])
    }

    pub fn send_data(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let bytes = self.serializer.dumps(data.as_ref())?;
        self.queue(Command::WorkData, &[&bytes])
    }

    pub fn send_warning(&mut self, warning: impl AsRef<[u8]>) -> Result<()> {
        let bytes = self.serializer.dumps(warning.as_ref())?;
        self.queue(Command::WorkWarning, &[&bytes])
    }

    pub fn send_complete(&mut self, result: impl AsRef<[u8]>) -> Result<()> {
        let bytes = self.serializer.dumps(result.as_ref())?;
        self.queue(Command::WorkComplete, &[&bytes])?;
        self.outcome = Some(JobOutcome::Complete(bytes));
        Ok(())
    }

    pub fn send_fail(&mut self) -> Result<()> {
        self.queue(Command::WorkFail, &[])?;
        self.outcome = Some(JobOutcome::Failed);
        Ok(())
    }

    /// Report an exception. Clients that did not ask for exceptions see
    /// this as a failure.
    pub fn send_exception(&mut self, exception: impl AsRef<[u8]>) -> Result<()> {
        let payload = exception.as_ref().to_vec();
        self.queue(Command::WorkException, &[&payload])?;
        self.outcome = Some(JobOutcome::Exception(payload));
        Ok(())
    }

    fn queue(&mut self, command: Command, rest: &[&[u8]]) -> Result<()> {
        if self.outcome.is_some() {
            return Err(GearError::UnknownState(format!(
                "job {} already finished, cannot send {command}",
                self.handle
            )));
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(rest.len() + 1);
        args.push(self.handle.as_bytes());
        args.extend_from_slice(rest);
        let packet = Packet::request(command, &args)?;
        match &mut self.outbox {
            Outbox::Held(packets) => packets.push(packet),
            Outbox::Live(tx) => tx.send(packet).map_err(|_| {
                GearError::UnknownState(format!("job {} is no longer being reported", self.handle))
            })?,
        }
        Ok(())
    }

    /// Fail the job unless it already reached an outcome.
    pub(crate) fn fail_if_open(&mut self) -> Result<()> {
        if self.outcome.is_none() {
            self.send_fail()?;
        }
        Ok(())
    }

    /// Send held and future effects to `tx` instead of holding them.
    pub(crate) fn forward_to(&mut self, tx: UnboundedSender<Packet>) -> Result<()> {
        for packet in self.take_held() {
            tx.send(packet).map_err(|_| {
                GearError::UnknownState(format!("job {} is no longer being reported", self.handle))
            })?;
        }
        self.outbox = Outbox::Live(tx);
        Ok(())
    }

    /// Held packets, oldest first. Empty for a live job.
    pub(crate) fn take_held(&mut self) -> Vec<Packet> {
        match &mut self.outbox {
            Outbox::Held(packets) => std::mem::take(packets),
            Outbox::Live(_) => Vec::new(),
        }
    }

    /// The outcome, releasing the job's outbox.
    pub(crate) fn into_outcome(self) -> Option<JobOutcome> {
        self.outcome
    }
}
