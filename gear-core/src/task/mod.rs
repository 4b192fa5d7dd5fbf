//! Client-side job records.
//!
//! A [`Task`] is created by the client engine for every submission and
//! follows the job through the server:
//!
//! ```text
//!  Created ──► Submitted ──► Queued ──► Running(n/d) ──► Complete
//!                 │             │             │      ├──► Failed
//!                 └─────────────┴─────────────┴──────┴──► Exception
//! ```
//!
//! Background tasks stop at `Queued`: the server never reports back on
//! them, so their result is always empty.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ── Identity ─────────────────────────────────────────────────────

/// Process-unique task identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

// ── Priority / JobMode ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
    Low,
}

/// Whether the client waits for the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobMode {
    #[default]
    Foreground,
    /// Fire-and-forget: done once the server hands out a job handle.
    Background,
}

// ── TaskState ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Created,
    /// Written to a server, waiting for `JOB_CREATED`.
    Submitted,
    /// The server assigned a handle.
    Queued,
    /// A worker reported progress or intermediate output.
    Running { numerator: u32, denominator: u32 },
    Complete,
    Failed,
    Exception,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Exception)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Submitted => write!(f, "submitted"),
            Self::Queued => write!(f, "queued"),
            Self::Running {
                numerator,
                denominator,
            } => write!(f, "running {numerator}/{denominator}"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

/// Error reported by the server for a submission (`ERROR` packet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub code: String,
    pub message: String,
}

// ── Task ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    function: String,
    unique: String,
    /// Serialized workload, kept for resubmission.
    workload: Vec<u8>,
    handle: Option<String>,
    priority: Priority,
    mode: JobMode,
    state: TaskState,
    server: Option<usize>,
    result: Vec<u8>,
    data: Vec<Vec<u8>>,
    warnings: Vec<Vec<u8>>,
    exception: Option<Vec<u8>>,
    failure: Option<TaskFailure>,
}

impl Task {
    pub(crate) fn new(
        function: impl Into<String>,
        unique: impl Into<String>,
        workload: Vec<u8>,
        priority: Priority,
        mode: JobMode,
    ) -> Self {
        Self {
            id: TaskId::next(),
            function: function.into(),
            unique: unique.into(),
            workload,
            handle: None,
            priority,
            mode,
            state: TaskState::Created,
            server: None,
            result: Vec::new(),
            data: Vec::new(),
            warnings: Vec::new(),
            exception: None,
            failure: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    pub fn unique(&self) -> &str {
        &self.unique
    }

    pub(crate) fn workload(&self) -> &[u8] {
        &self.workload
    }

    /// Server-assigned handle, once `JOB_CREATED` arrived.
    pub fn job_handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn is_background(&self) -> bool {
        self.mode == JobMode::Background
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Index of the server the task was submitted to.
    pub fn server(&self) -> Option<usize> {
        self.server
    }

    /// The server knows the job and it has not finished.
    pub fn is_known(&self) -> bool {
        self.handle.is_some() && !self.state.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TaskState::Running { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Nothing more will be learned about this task: foreground tasks
    /// are terminal, background tasks have a handle (or failed).
    pub fn is_settled(&self) -> bool {
        match self.mode {
            JobMode::Foreground => self.is_terminal(),
            JobMode::Background => self.handle.is_some() || self.is_terminal(),
        }
    }

    pub fn numerator(&self) -> u32 {
        match self.state {
            TaskState::Running { numerator, .. } => numerator,
            _ => 0,
        }
    }

    pub fn denominator(&self) -> u32 {
        match self.state {
            TaskState::Running { denominator, .. } => denominator,
            _ => 0,
        }
    }

    /// `WORK_COMPLETE` payload; always empty for background tasks.
    pub fn result(&self) -> &[u8] {
        &self.result
    }

    /// Every `WORK_DATA` chunk received so far, oldest first.
    pub fn data_chunks(&self) -> &[Vec<u8>] {
        &self.data
    }

    /// The most recent `WORK_DATA` chunk.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.last().map(Vec::as_slice)
    }

    pub fn warnings(&self) -> &[Vec<u8>] {
        &self.warnings
    }

    pub fn warning(&self) -> Option<&[u8]> {
        self.warnings.last().map(Vec::as_slice)
    }

    pub fn exception(&self) -> Option<&[u8]> {
        self.exception.as_deref()
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    // ── Transitions (engine only) ────────────────────────────────

    pub(crate) fn submitted(&mut self, server: usize) {
        self.server = Some(server);
        self.state = TaskState::Submitted;
    }

    pub(crate) fn created(&mut self, handle: String) {
        self.handle = Some(handle);
        self.state = TaskState::Queued;
    }

    pub(crate) fn progress(&mut self, numerator: u32, denominator: u32) {
        self.state = TaskState::Running {
            numerator,
            denominator,
        };
    }

    /// Enter `Running` without changing a reported ratio.
    fn touch(&mut self) {
        if !self.is_running() {
            self.progress(0, 0);
        }
    }

    /// Record a data chunk; `unbuffered` keeps only the latest one.
    pub(crate) fn push_data(&mut self, chunk: Vec<u8>, unbuffered: bool) {
        if unbuffered {
            self.data.clear();
        }
        self.data.push(chunk);
        self.touch();
    }

    pub(crate) fn push_warning(&mut self, chunk: Vec<u8>) {
        self.warnings.push(chunk);
        self.touch();
    }

    pub(crate) fn complete(&mut self, result: Vec<u8>) {
        if !self.is_background() {
            self.result = result;
        }
        self.state = TaskState::Complete;
    }

    pub(crate) fn fail(&mut self, failure: Option<TaskFailure>) {
        self.failure = failure;
        self.state = TaskState::Failed;
    }

    pub(crate) fn raise(&mut self, exception: Vec<u8>) {
        self.exception = Some(exception);
        self.state = TaskState::Exception;
    }

    /// The connection carrying this task was lost: forget the server's
    /// view so the next run submits it again under the same unique id.
    pub(crate) fn reset(&mut self) {
        self.handle = None;
        self.server = None;
        self.state = TaskState::Created;
    }
}
