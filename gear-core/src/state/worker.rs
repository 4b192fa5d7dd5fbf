//! Work-cycle state machine driven by `Worker::work`.

use crate::error::GearError;

/// Where one `work()` cycle currently stands.
///
/// ```text
///  Idle ──► Polling ──► Executing ──► Reporting ──► Idle
///           │ │  ▲
///           │ ▼  │
///           │ Sleeping ──► TimedOut ──► Idle
///           └──► Idle  (job handed to the caller)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkPhase {
    #[default]
    Idle,

    /// Asking servers for a job.
    Polling,

    /// Every server said `NO_JOB`; waiting for a `NOOP` wake-up.
    Sleeping,

    /// A handler is running for `handle`.
    Executing { handle: String },

    /// Sending the handler's effects and outcome for `handle`.
    Reporting { handle: String },

    /// The cycle deadline passed before a job arrived.
    TimedOut,
}

impl std::fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Polling => write!(f, "Polling"),
            Self::Sleeping => write!(f, "Sleeping"),
            Self::Executing { handle } => write!(f, "Executing({handle})"),
            Self::Reporting { handle } => write!(f, "Reporting({handle})"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

impl WorkPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Handle of the job being executed or reported, if any.
    pub fn current_handle(&self) -> Option<&str> {
        match self {
            Self::Executing { handle } | Self::Reporting { handle } => Some(handle),
            _ => None,
        }
    }

    fn invalid(&self, action: &str) -> GearError {
        GearError::UnknownState(format!("cannot {action}: worker is {self}"))
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`, `Sleeping` (after a wake-up).
    pub fn poll(&mut self) -> Result<(), GearError> {
        match self {
            Self::Idle | Self::Sleeping => {
                *self = Self::Polling;
                Ok(())
            }
            _ => Err(self.invalid("poll")),
        }
    }

    /// Valid from: `Polling`.
    pub fn sleep(&mut self) -> Result<(), GearError> {
        match self {
            Self::Polling => {
                *self = Self::Sleeping;
                Ok(())
            }
            _ => Err(self.invalid("sleep")),
        }
    }

    /// Valid from: `Polling`.
    pub fn assign(&mut self, handle: impl Into<String>) -> Result<(), GearError> {
        match self {
            Self::Polling => {
                *self = Self::Executing {
                    handle: handle.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid("accept a job")),
        }
    }

    /// The grabbed job goes to the caller instead of a handler.
    ///
    /// Valid from: `Polling`.
    pub fn hand_off(&mut self) -> Result<(), GearError> {
        match self {
            Self::Polling => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(self.invalid("hand off a job")),
        }
    }

    /// Valid from: `Executing`.
    pub fn report(&mut self) -> Result<(), GearError> {
        match std::mem::take(self) {
            Self::Executing { handle } => {
                *self = Self::Reporting { handle };
                Ok(())
            }
            other => {
                *self = other;
                Err(self.invalid("report"))
            }
        }
    }

    /// Valid from: `Polling`, `Sleeping`.
    pub fn time_out(&mut self) -> Result<(), GearError> {
        match self {
            Self::Polling | Self::Sleeping => {
                *self = Self::TimedOut;
                Ok(())
            }
            _ => Err(self.invalid("time out")),
        }
    }

    /// Valid from: `Reporting`, `TimedOut`.
    pub fn finish(&mut self) -> Result<(), GearError> {
        match self {
            Self::Reporting { .. } | Self::TimedOut => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(self.invalid("finish")),
        }
    }

    /// Back to `Idle` after an I/O error aborted the cycle.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_cycle() {
        let mut phase = WorkPhase::default();
        phase.poll().unwrap();
        phase.assign("H:lap:1").unwrap();
        assert_eq!(phase.current_handle(), Some("H:lap:1"));
        phase.report().unwrap();
        assert_eq!(phase, WorkPhase::Reporting { handle: "H:lap:1".into() });
        phase.finish().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn sleep_wake_timeout_cycle() {
        let mut phase = WorkPhase::Idle;
        phase.poll().unwrap();
        phase.sleep().unwrap();
        phase.poll().unwrap();
        phase.sleep().unwrap();
        phase.time_out().unwrap();
        assert_eq!(phase.to_string(), "TimedOut");
        phase.finish().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn hand_off_only_while_polling() {
        let mut phase = WorkPhase::Idle;
        assert!(phase.hand_off().is_err());
        phase.poll().unwrap();
        phase.hand_off().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn invalid_transitions() {
        let mut phase = WorkPhase::Idle;
        assert!(phase.assign("H:1").is_err());
        assert!(phase.report().is_err());
        assert!(phase.is_idle());
        assert!(phase.finish().is_err());

        let mut phase = WorkPhase::Executing { handle: "H:1".into() };
        assert!(phase.poll().is_err());
        assert!(phase.time_out().is_err());
        phase.reset();
        assert!(phase.is_idle());
    }
}
