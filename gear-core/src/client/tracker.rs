//! Outstanding-task bookkeeping for the client engine.
//!
//! Maps server replies back to tasks: `JOB_CREATED` answers submissions on
//! a connection in order, every later packet carries the job handle.

use std::collections::{HashMap, VecDeque};

use crate::task::{Task, TaskId};

#[derive(Debug, Default)]
pub(crate) struct TaskTracker {
    /// Tasks in submission order.
    tasks: Vec<Task>,
    /// Per server: submissions still waiting for `JOB_CREATED`.
    awaiting_created: HashMap<usize, VecDeque<TaskId>>,
    /// Per server: foreground handles that can still receive work packets.
    by_handle: HashMap<(usize, String), TaskId>,
    /// Per server: `OPTION_REQ`s sent but not yet answered.
    options_pending: HashMap<usize, usize>,
}

impl TaskTracker {
    pub fn track(&mut self, task: Task) -> TaskId {
        let id = task.id();
        self.tasks.push(task);
        id
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    /// Tasks not yet written to any server.
    pub fn unsubmitted(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.server().is_none() && !t.is_terminal())
            .map(Task::id)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_settled()).count()
    }

    pub fn all_settled(&self) -> bool {
        self.pending_count() == 0
    }

    /// Untracked tasks count as settled.
    pub fn is_settled(&self, id: TaskId) -> bool {
        self.get(id).is_none_or(Task::is_settled)
    }

    // ── Submission ───────────────────────────────────────────────

    pub fn submitted(&mut self, id: TaskId, server: usize) {
        if let Some(task) = self.get_mut(id) {
            task.submitted(server);
            self.awaiting_created.entry(server).or_default().push_back(id);
        }
    }

    /// Attach `handle` to the oldest submission on `server`.
    pub fn created(&mut self, server: usize, handle: String) -> Option<TaskId> {
        let id = self.pop_awaiting(server)?;
        let task = self.get_mut(id)?;
        task.created(handle.clone());
        if !task.is_background() {
            self.by_handle.insert((server, handle), id);
        }
        Some(id)
    }

    /// Remove and return the oldest submission on `server` still waiting
    /// for `JOB_CREATED`.
    pub fn pop_awaiting(&mut self, server: usize) -> Option<TaskId> {
        self.awaiting_created.get_mut(&server)?.pop_front()
    }

    pub fn lookup(&self, server: usize, handle: &str) -> Option<TaskId> {
        self.by_handle.get(&(server, handle.to_string())).copied()
    }

    /// The handle reached a terminal packet; later packets are ignored.
    pub fn finish(&mut self, server: usize, handle: &str) {
        self.by_handle.remove(&(server, handle.to_string()));
    }

    // ── Options ──────────────────────────────────────────────────

    pub fn option_sent(&mut self, server: usize) {
        *self.options_pending.entry(server).or_default() += 1;
    }

    /// Consume one outstanding option request on `server`, if any.
    pub fn option_answered(&mut self, server: usize) -> bool {
        match self.options_pending.get_mut(&server) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// The server `id` was submitted to, while its `JOB_CREATED` is owed.
    pub fn awaiting_server(&self, id: TaskId) -> Option<usize> {
        self.awaiting_created
            .iter()
            .find(|(_, q)| q.contains(&id))
            .map(|(s, _)| *s)
    }

    // ── Failure ──────────────────────────────────────────────────

    /// The connection to `server` is gone. Unsettled tasks on it go back
    /// to `Created` so the next run resubmits them. Returns how many.
    pub fn lost(&mut self, server: usize) -> usize {
        self.awaiting_created.remove(&server);
        self.options_pending.remove(&server);
        self.by_handle.retain(|(s, _), _| *s != server);

        let mut reset = 0;
        for task in &mut self.tasks {
            if task.server() == Some(server) && !task.is_settled() {
                task.reset();
                reset += 1;
            }
        }
        reset
    }

    /// Every server is forgotten; all unsettled tasks start over.
    pub fn lost_all(&mut self) {
        let servers: Vec<usize> = self.tasks.iter().filter_map(Task::server).collect();
        for server in servers {
            self.lost(server);
        }
        self.awaiting_created.clear();
        self.options_pending.clear();
        self.by_handle.clear();
    }

    // ── Draining ─────────────────────────────────────────────────

    pub fn drain(&mut self) -> Vec<Task> {
        self.awaiting_created.clear();
        self.by_handle.clear();
        std::mem::take(&mut self.tasks)
    }

    /// Stop tracking `id`; later packets for it are ignored.
    pub fn take(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.id() == id)?;
        self.by_handle.retain(|_, tracked| *tracked != id);
        for queue in self.awaiting_created.values_mut() {
            queue.retain(|tracked| *tracked != id);
        }
        Some(self.tasks.remove(pos))
    }
}
