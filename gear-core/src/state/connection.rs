//! Per-server connection state machine used by the pool.
//!
//! Provides a `ConnectionPhase` enum that models the lifecycle of one
//! server socket, with validated transitions that return `Result`
//! instead of panicking.

use std::time::{Duration, Instant};

use crate::error::GearError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of one server connection.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲     ▲          │              │
///       │     └──────────┼──── Failed ◄─┘
///       │                ▼       │
///       └────────────────┴───────┘ (retry)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No socket. Initial state.
    #[default]
    Disconnected,

    /// TCP connect in progress.
    Connecting,

    /// Socket established and usable.
    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },

    /// The last connect or I/O attempt failed. The endpoint is skipped
    /// by selection until every healthy endpoint has been tried.
    Failed {
        at: Instant,
        reason: String,
    },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Failed { reason, .. } => write!(f, "Failed ({reason})"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// `false` only after a failure that has not been retried yet.
    pub fn is_healthy(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// How long the connection has been up; `None` unless connected.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Failed`.
    pub fn begin_connect(&mut self) -> Result<(), GearError> {
        match self {
            Self::Disconnected | Self::Failed { .. } => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(GearError::UnknownState(format!(
                "cannot connect: connection is {self}"
            ))),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), GearError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(GearError::UnknownState(format!(
                "cannot complete connect: connection is {self}"
            ))),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Valid from: `Connecting`, `Connected`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), GearError> {
        match self {
            Self::Connecting | Self::Connected { .. } => {
                *self = Self::Failed {
                    at: Instant::now(),
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(GearError::UnknownState(format!(
                "cannot fail: connection is {self}"
            ))),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
