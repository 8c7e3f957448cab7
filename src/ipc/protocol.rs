//! IPC Protocol definitions
//!
//! This module defines the command and response types used for
//! inter-process communication via Unix socket.

use serde::{Deserialize, Serialize};

use crate::admin::{AdminCommand, AdminOutcome};
use crate::routing::{
    MatchMode, NextDomain, NextDomainRequest, ReloadReport, RouteDecision, RouteDump,
    RouteRequest, SnapshotStats,
};

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get server status
    Status,

    /// Rebuild the routing snapshot from the source
    ReloadRoutes,

    /// Dump every rule of the live snapshot
    DumpRoutes,

    /// Append a rule (`-d -p -h -w` plus optional `-P -S -i`)
    AddHost {
        /// Option tokens
        args: Vec<String>,
    },

    /// Delete matching rules
    DeleteHost {
        /// Option tokens
        args: Vec<String>,
    },

    /// Replace the host of matching rules
    ReplaceHost {
        /// Option tokens
        args: Vec<String>,
    },

    /// Activate matching rules
    ActivateHost {
        /// Option tokens
        args: Vec<String>,
    },

    /// Deactivate matching rules, optionally naming a backup with `-t`
    DeactivateHost {
        /// Option tokens
        args: Vec<String>,
    },

    /// Run a routing lookup against the live snapshot
    TestRoute {
        /// Lookup request
        request: RouteRequest,
    },

    /// Run a failure routing lookup against the live snapshot
    TestNextDomain {
        /// Failure routing request
        request: NextDomainRequest,
    },

    /// Stop the daemon
    Shutdown,
}

impl IpcCommand {
    /// The administrative edit and its option tokens, if this is one
    #[must_use]
    pub fn admin(&self) -> Option<(AdminCommand, &[String])> {
        match self {
            Self::AddHost { args } => Some((AdminCommand::Add, args.as_slice())),
            Self::DeleteHost { args } => Some((AdminCommand::Delete, args.as_slice())),
            Self::ReplaceHost { args } => Some((AdminCommand::Replace, args.as_slice())),
            Self::ActivateHost { args } => Some((AdminCommand::Activate, args.as_slice())),
            Self::DeactivateHost { args } => Some((AdminCommand::Deactivate, args.as_slice())),
            _ => None,
        }
    }

    /// Build an administrative command from a whitespace separated option line
    #[must_use]
    pub fn admin_line(command: AdminCommand, line: &str) -> Self {
        let args = line.split_whitespace().map(String::from).collect();
        match command {
            AdminCommand::Add => Self::AddHost { args },
            AdminCommand::Delete => Self::DeleteHost { args },
            AdminCommand::Replace => Self::ReplaceHost { args },
            AdminCommand::Activate => Self::ActivateHost { args },
            AdminCommand::Deactivate => Self::DeactivateHost { args },
        }
    }

    /// True for commands that change routing state
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::ReloadRoutes
                | Self::AddHost { .. }
                | Self::DeleteHost { .. }
                | Self::ReplaceHost { .. }
                | Self::ActivateHost { .. }
                | Self::DeactivateHost { .. }
        )
    }
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Pong response
    Pong,

    /// Server status
    Status(ServerStatus),

    /// A new snapshot was published
    Reloaded(ReloadReport),

    /// Route dump in structured and text form
    Dump {
        /// Structured dump
        dump: RouteDump,
        /// Rendered text lines
        text: String,
    },

    /// An administrative edit was applied
    Admin(AdminOutcome),

    /// Lookup result
    Route(RouteDecision),

    /// Failure routing result
    NextDomain(NextDomain),

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(ErrorResponse),
}

impl IpcResponse {
    /// Create a success response with no message
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response with the status class of `code`
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::error_with_status(code, code.status(), message)
    }

    /// Create an error response with an explicit status class
    pub fn error_with_status(code: ErrorCode, status: u16, message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse {
            code,
            status,
            message: message.into(),
            admin_code: None,
        })
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Server status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Description of the route source
    pub source: String,
    /// Trie alphabet
    pub match_mode: MatchMode,
    /// Generation of the live snapshot, 0 before the first load
    pub generation: u64,
    /// Counts of the live snapshot
    pub stats: Option<SnapshotStats>,
    /// Whether shutdown is in progress
    pub shutting_down: bool,
}

/// Error details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: ErrorCode,
    /// Status class (200 help, 400 caller mistake, 500 server side)
    pub status: u16,
    /// Human-readable message
    pub message: String,
    /// Administrative error code, for rejected edits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_code: Option<crate::error::AdminErrorCode>,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// No snapshot has been loaded yet
    NotLoaded,
    /// The lookup found no route
    NoRoute,
    /// The lookup failed for a reason other than a miss
    LookupFailed,
    /// Building a new snapshot failed
    ReloadFailed,
    /// Administrative edit rejected or failed
    AdminFailed,
    /// Server is shutting down
    ShuttingDown,
    /// Internal error
    InternalError,
}

impl ErrorCode {
    /// Default status class
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::InvalidCommand | Self::InvalidParameters | Self::NoRoute => 400,
            Self::NotLoaded
            | Self::LookupFailed
            | Self::ReloadFailed
            | Self::AdminFailed
            | Self::ShuttingDown
            | Self::InternalError => 500,
        }
    }
}

/// Maximum message size accepted by the client
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len())
        .map_err(<serde_json::Error as serde::ser::Error>::custom)?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a length-prefixed message
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
