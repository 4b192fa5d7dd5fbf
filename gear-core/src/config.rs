//! Process-wide defaults and the TOML file configuration shared by the
//! driver binaries.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GearError;

// ── Constants ────────────────────────────────────────────────────

/// Job server port used when none (or a non-positive one) is given.
pub const DEFAULT_PORT: u16 = 4730;

/// Client engine timeout in milliseconds. Negative blocks forever.
pub const DEFAULT_CLIENT_TIMEOUT_MS: i64 = -1;

/// Worker engine timeout in milliseconds.
pub const DEFAULT_WORKER_TIMEOUT_MS: i64 = 10_000;

/// Admin session timeout in milliseconds.
pub const DEFAULT_ADMIN_TIMEOUT_MS: i64 = 60_000;

/// Largest body a binary frame may declare (16 MiB).
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Longest admin reply line accepted before the codec gives up.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

// ── VerboseLevel ─────────────────────────────────────────────────

/// Server verbosity as reported by the admin `verbose` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerboseLevel {
    Never,
    Fatal,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl fmt::Display for VerboseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerboseLevel::Never => "NEVER",
            VerboseLevel::Fatal => "FATAL",
            VerboseLevel::Error => "ERROR",
            VerboseLevel::Warning => "WARNING",
            VerboseLevel::Notice => "NOTICE",
            VerboseLevel::Info => "INFO",
            VerboseLevel::Debug => "DEBUG",
        };
        f.write_str(name)
    }
}

impl FromStr for VerboseLevel {
    type Err = GearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEVER" => Ok(VerboseLevel::Never),
            "FATAL" => Ok(VerboseLevel::Fatal),
            "ERROR" => Ok(VerboseLevel::Error),
            "WARNING" => Ok(VerboseLevel::Warning),
            "NOTICE" => Ok(VerboseLevel::Notice),
            "INFO" => Ok(VerboseLevel::Info),
            "DEBUG" => Ok(VerboseLevel::Debug),
            other => Err(GearError::MalformedPacket(format!(
                "unknown verbosity level {other:?}"
            ))),
        }
    }
}

// ── File configuration ───────────────────────────────────────────

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GearConfig {
    /// Job servers as `host` or `host:port`.
    pub servers: Vec<String>,
    /// Engine timeouts.
    pub timeouts: TimeoutConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Engine timeouts in milliseconds; negative means no limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub client_ms: i64,
    pub worker_ms: i64,
    pub admin_ms: i64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

impl Default for GearConfig {
    fn default() -> Self {
        Self {
            servers: vec![format!("localhost:{DEFAULT_PORT}")],
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_ms: DEFAULT_CLIENT_TIMEOUT_MS,
            worker_ms: DEFAULT_WORKER_TIMEOUT_MS,
            admin_ms: DEFAULT_ADMIN_TIMEOUT_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl GearConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}
