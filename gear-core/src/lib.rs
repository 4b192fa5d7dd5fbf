//! # gear-core
//!
//! Client, worker and admin library for the Gearman job-queue protocol.
//!
//! This crate contains:
//! - **Protocol types**: `PacketHeader`, `Packet`, `Command`, `Magic`
//! - **Codec**: `PacketCodec` (binary) and `LineCodec` (admin text) for `tokio_util` framing
//! - **Network**: `Connection`, `ServerEndpoint` and the round-robin `ServerPool`
//! - **Client**: `Client` submitting `Task`s with per-event callbacks
//! - **Worker**: `Worker` running registered handlers against assigned `Job`s
//! - **Admin**: `Admin` session for the text administration protocol
//! - **State**: connection and work-cycle state machines
//! - **Error**: `GearError`, a `thiserror`-based error hierarchy

pub mod admin;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod network;
pub mod packet;
pub mod serializer;
pub mod state;
pub mod task;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use admin::{Admin, AdminInfo, FunctionStatus, JobInfo, WorkerInfo};
pub use client::{Client, JobStatus, TaskCallback, TaskEvent};
pub use codec::{LineCodec, PacketCodec};
pub use config::{DEFAULT_PORT, GearConfig, VerboseLevel};
pub use error::{GearError, Result};
pub use flags::ClientOptions;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::{Command, Magic};
pub use network::{AdminConnection, Connection, Deadline, JobConnection, ServerEndpoint, ServerPool};
pub use packet::{Packet, decode, encode};
pub use serializer::{Passthrough, Serializer, Utf8Text};
pub use state::{ConnectionPhase, WorkPhase};
pub use task::{JobMode, Priority, Task, TaskFailure, TaskId, TaskState};
pub use worker::{Handler, HandlerResult, Job, JobOutcome, JobReport, Worker};
