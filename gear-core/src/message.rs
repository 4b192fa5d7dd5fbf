//! Protocol magic values and the binary command set.
//!
//! Uses proper enums with `TryFrom`, no panics on unknown values.

use std::fmt;

use crate::error::GearError;
use crate::task::{JobMode, Priority};

// ── Magic ────────────────────────────────────────────────────────

/// Distinguishes requests (to the server) from responses (from it).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magic {
    /// `\0REQ`
    Request = 0x0052_4551,
    /// `\0RES`
    Response = 0x0052_4553,
}

impl Magic {
    pub fn to_bytes(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }
}

impl TryFrom<u32> for Magic {
    type Error = GearError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0052_4551 => Ok(Magic::Request),
            0x0052_4553 => Ok(Magic::Response),
            _ => Err(GearError::MalformedPacket(format!(
                "unknown magic {value:#010x}"
            ))),
        }
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Magic::Request => write!(f, "REQ"),
            Magic::Response => write!(f, "RES"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// Every command code of the binary job protocol.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Worker registration ──────────────────────────────────────
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,

    // ── Submission ───────────────────────────────────────────────
    SubmitJob = 7,
    JobCreated = 8,

    // ── Job assignment ───────────────────────────────────────────
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,

    // ── Work progress ────────────────────────────────────────────
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,

    // ── Misc ─────────────────────────────────────────────────────
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
}

impl Command {
    /// All commands, in code order.
    pub const ALL: [Command; 33] = [
        Command::CanDo,
        Command::CantDo,
        Command::ResetAbilities,
        Command::PreSleep,
        Command::Noop,
        Command::SubmitJob,
        Command::JobCreated,
        Command::GrabJob,
        Command::NoJob,
        Command::JobAssign,
        Command::WorkStatus,
        Command::WorkComplete,
        Command::WorkFail,
        Command::GetStatus,
        Command::EchoReq,
        Command::EchoRes,
        Command::SubmitJobBg,
        Command::Error,
        Command::StatusRes,
        Command::SubmitJobHigh,
        Command::SetClientId,
        Command::CanDoTimeout,
        Command::AllYours,
        Command::WorkException,
        Command::OptionReq,
        Command::OptionRes,
        Command::WorkData,
        Command::WorkWarning,
        Command::GrabJobUniq,
        Command::JobAssignUniq,
        Command::SubmitJobHighBg,
        Command::SubmitJobLow,
        Command::SubmitJobLowBg,
    ];

    /// The wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Number of NUL-separated arguments the body carries.
    pub fn arg_count(self) -> usize {
        match self {
            Command::ResetAbilities
            | Command::PreSleep
            | Command::Noop
            | Command::GrabJob
            | Command::NoJob
            | Command::AllYours
            | Command::GrabJobUniq => 0,

            Command::CanDo
            | Command::CantDo
            | Command::JobCreated
            | Command::WorkFail
            | Command::GetStatus
            | Command::EchoReq
            | Command::EchoRes
            | Command::SetClientId
            | Command::OptionReq
            | Command::OptionRes => 1,

            Command::WorkComplete
            | Command::Error
            | Command::CanDoTimeout
            | Command::WorkException
            | Command::WorkData
            | Command::WorkWarning => 2,

            Command::SubmitJob
            | Command::JobAssign
            | Command::WorkStatus
            | Command::SubmitJobBg
            | Command::SubmitJobHigh
            | Command::SubmitJobHighBg
            | Command::SubmitJobLow
            | Command::SubmitJobLowBg => 3,

            Command::JobAssignUniq => 4,

            Command::StatusRes => 5,
        }
    }

    /// The submission command for a priority and mode.
    pub fn submit(priority: Priority, mode: JobMode) -> Self {
        match (priority, mode) {
            (Priority::Normal, JobMode::Foreground) => Command::SubmitJob,
            (Priority::Normal, JobMode::Background) => Command::SubmitJobBg,
            (Priority::High, JobMode::Foreground) => Command::SubmitJobHigh,
            (Priority::High, JobMode::Background) => Command::SubmitJobHighBg,
            (Priority::Low, JobMode::Foreground) => Command::SubmitJobLow,
            (Priority::Low, JobMode::Background) => Command::SubmitJobLowBg,
        }
    }

    /// Protocol name, e.g. `SUBMIT_JOB_BG`.
    pub fn name(self) -> &'static str {
        match self {
            Command::CanDo => "CAN_DO",
            Command::CantDo => "CANT_DO",
            Command::ResetAbilities => "RESET_ABILITIES",
            Command::PreSleep => "PRE_SLEEP",
            Command::Noop => "NOOP",
            Command::SubmitJob => "SUBMIT_JOB",
            Command::JobCreated => "JOB_CREATED",
            Command::GrabJob => "GRAB_JOB",
            Command::NoJob => "NO_JOB",
            Command::JobAssign => "JOB_ASSIGN",
            Command::WorkStatus => "WORK_STATUS",
            Command::WorkComplete => "WORK_COMPLETE",
            Command::WorkFail => "WORK_FAIL",
            Command::GetStatus => "GET_STATUS",
            Command::EchoReq => "ECHO_REQ",
            Command::EchoRes => "ECHO_RES",
            Command::SubmitJobBg => "SUBMIT_JOB_BG",
            Command::Error => "ERROR",
            Command::StatusRes => "STATUS_RES",
            Command::SubmitJobHigh => "SUBMIT_JOB_HIGH",
            Command::SetClientId => "SET_CLIENT_ID",
            Command::CanDoTimeout => "CAN_DO_TIMEOUT",
            Command::AllYours => "ALL_YOURS",
            Command::WorkException => "WORK_EXCEPTION",
            Command::OptionReq => "OPTION_REQ",
            Command::OptionRes => "OPTION_RES",
            Command::WorkData => "WORK_DATA",
            Command::WorkWarning => "WORK_WARNING",
            Command::GrabJobUniq => "GRAB_JOB_UNIQ",
            Command::JobAssignUniq => "JOB_ASSIGN_UNIQ",
            Command::SubmitJobHighBg => "SUBMIT_JOB_HIGH_BG",
            Command::SubmitJobLow => "SUBMIT_JOB_LOW",
            Command::SubmitJobLowBg => "SUBMIT_JOB_LOW_BG",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = GearError;

    fn try_from(value: u32) -> Result<Self, GearError> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.code() == value)
            .ok_or_else(|| GearError::MalformedPacket(format!("unknown command code {value}")))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
