//! Per-engine callback slots, one per task event class.

use std::fmt;

use crate::task::Task;

pub type TaskCallback = Box<dyn FnMut(&Task) + Send>;

/// What just happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Created,
    Data,
    Warning,
    Status,
    Complete,
    Exception,
    Fail,
}

impl TaskEvent {
    pub const ALL: [TaskEvent; 7] = [
        TaskEvent::Created,
        TaskEvent::Data,
        TaskEvent::Warning,
        TaskEvent::Status,
        TaskEvent::Complete,
        TaskEvent::Exception,
        TaskEvent::Fail,
    ];

    /// `Complete`, `Exception` and `Fail` end a foreground task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Exception | Self::Fail)
    }
}

#[derive(Default)]
pub(crate) struct Callbacks {
    created: Option<TaskCallback>,
    data: Option<TaskCallback>,
    warning: Option<TaskCallback>,
    status: Option<TaskCallback>,
    complete: Option<TaskCallback>,
    exception: Option<TaskCallback>,
    fail: Option<TaskCallback>,
}

impl Callbacks {
    fn slot(&mut self, event: TaskEvent) -> &mut Option<TaskCallback> {
        match event {
            TaskEvent::Created => &mut self.created,
            TaskEvent::Data => &mut self.data,
            TaskEvent::Warning => &mut self.warning,
            TaskEvent::Status => &mut self.status,
            TaskEvent::Complete => &mut self.complete,
            TaskEvent::Exception => &mut self.exception,
            TaskEvent::Fail => &mut self.fail,
        }
    }

    pub fn set(&mut self, event: TaskEvent, callback: TaskCallback) {
        *self.slot(event) = Some(callback);
    }

    pub fn fire(&mut self, event: TaskEvent, task: &Task) {
        if let Some(callback) = self.slot(event) {
            callback(task);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn is_set(&self, event: TaskEvent) -> bool {
        match event {
            TaskEvent::Created => self.created.is_some(),
            TaskEvent::Data => self.data.is_some(),
            TaskEvent::Warning => self.warning.is_some(),
            TaskEvent::Status => self.status.is_some(),
            TaskEvent::Complete => self.complete.is_some(),
            TaskEvent::Exception => self.exception.is_some(),
            TaskEvent::Fail => self.fail.is_some(),
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<TaskEvent> = TaskEvent::ALL
            .into_iter()
            .filter(|e| self.is_set(*e))
            .collect();
        f.debug_struct("Callbacks").field("set", &set).finish()
    }
}
