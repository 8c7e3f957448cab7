//! Error types for carrier-router
//!
//! This module defines the error hierarchy of the routing engine. Errors are
//! grouped by subsystem: building a snapshot (load and fixup), publishing it
//! (reload), using it (lookup), editing it (admin) and the control plane (IPC).
//!
//! Lookup errors are special: most of them are ordinary negative answers
//! ("no route") rather than failures. Use [`LookupError::is_miss`] to tell the
//! two apart.

use std::io;

use thiserror::Error;

/// Top-level error type for carrier-router
#[derive(Debug, Error)]
pub enum CarrierRouteError {
    /// Daemon configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Building or publishing a routing snapshot failed
    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),

    /// Route lookup failed
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Administrative edit rejected or failed
    #[error("Admin error: {0}")]
    Admin(#[from] AdminError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CarrierRouteError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Reload(e) => e.is_recoverable(),
            Self::Lookup(e) => e.is_miss(),
            Self::Admin(e) => e.is_recoverable(),
            Self::Ipc(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Errors raised while a route source populates a snapshot builder
#[derive(Debug, Error)]
pub enum LoadError {
    /// Route file not found
    #[error("Route source not found: {path}")]
    NotFound { path: String },

    /// Syntax error in the route file
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// A prefix contains a symbol the trie cannot branch on
    #[error("Invalid prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    /// A failure rule reply code is not three digits or '.' wildcards
    #[error("Invalid reply code '{0}': expected 3 characters of digits or '.'")]
    InvalidReplyCode(String),

    /// A weight outside 0..=1
    #[error("Invalid weight {weight} for host '{host}'")]
    InvalidWeight { host: String, weight: f64 },

    /// Carrier id unknown to the builder
    #[error("Unknown carrier id {0}")]
    UnknownCarrier(u32),

    /// Domain id unknown to the builder
    #[error("Unknown domain id {0}")]
    UnknownDomain(u32),

    /// The source cannot be written back
    #[error("Route source '{0}' is read-only")]
    ReadOnly(String),

    /// I/O error while reading or writing the source
    #[error("Route source I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl LoadError {
    /// Create a parse error
    pub fn parse(line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }

    /// Create an invalid prefix error
    pub fn invalid_prefix(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPrefix {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }
}

/// Errors detected while fixing up a freshly loaded snapshot
///
/// Any of these means the source data is malformed; the whole build is
/// discarded.
#[derive(Debug, Error)]
pub enum FixupError {
    /// Number of rules in a group differs from the declared target count
    #[error("Prefix '{prefix}': number of rules ({rules}) differs from max_targets ({declared})")]
    TargetCountMismatch {
        prefix: String,
        rules: usize,
        declared: usize,
    },

    /// Explicit hash index larger than the rule count
    #[error("Prefix '{prefix}': hash index {index} too large, max is {max}")]
    HashIndexTooLarge {
        prefix: String,
        index: u32,
        max: usize,
    },

    /// Two rules claim the same explicit hash index
    #[error("Prefix '{prefix}': duplicate hash index {index}")]
    DuplicateHashIndex { prefix: String, index: u32 },

    /// A backup reference points at a hash index that does not exist
    #[error("Prefix '{prefix}': host '{host}' names missing backup route {index}")]
    MissingBackup {
        prefix: String,
        host: String,
        index: u32,
    },

    /// A backed-up reference points at a hash index that does not exist
    #[error("Prefix '{prefix}': host '{host}' names missing backed up route {index}")]
    MissingBackedUp {
        prefix: String,
        host: String,
        index: u32,
    },

    /// The two sides of a backup link disagree
    #[error("Prefix '{prefix}': rule {index} is listed as backed up by {backup} but names {actual:?} as its backup")]
    InconsistentBackup {
        prefix: String,
        index: u32,
        backup: u32,
        actual: Option<u32>,
    },

    /// Configured default carrier name is not a loaded carrier
    #[error("Default carrier '{0}' not found")]
    UnknownDefaultCarrier(String),
}

/// Errors that abort a reload; the live snapshot is left untouched
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The source could not populate the snapshot
    #[error("Failed to load routing data: {0}")]
    Load(#[from] LoadError),

    /// The loaded data failed validation
    #[error("Failed to fix up routing data: {0}")]
    Fixup(#[from] FixupError),
}

impl ReloadError {
    /// Only I/O problems are worth retrying; malformed data stays malformed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Load(LoadError::IoError(_)))
    }
}

/// Route lookup outcomes other than a selected rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No snapshot has been published yet
    #[error("Routing data not available")]
    Unavailable,

    /// Carrier id or name does not resolve
    #[error("Cannot get carrier data for '{0}'")]
    UnknownCarrier(String),

    /// Domain id or name does not resolve in the chosen carrier
    #[error("Routing domain '{domain}' doesn't exist in carrier {carrier}")]
    UnknownDomain { carrier: u32, domain: String },

    /// Trie has no payload along the prefix
    #[error("No prefix matches '{0}'")]
    NoPrefixMatch(String),

    /// No rule group accepts the request flags
    #[error("No matching ruleset for flags {0}")]
    NoMatchingRuleset(u32),

    /// The matched group has no rules
    #[error("Empty rule list")]
    EmptyRuleList,

    /// Weighted selection on a group whose weights sum to zero
    #[error("Invalid dice_max value (route has probability 0)")]
    ZeroProbability,

    /// Selected rule is off and has no usable backup
    #[error("All routes are off")]
    AllRoutesOff,

    /// Every rule in the group was tried already
    #[error("All gateways from this group were already used")]
    AllDestinationsUsed,

    /// Strict-hash slot is off and its backup is unusable
    #[error("No route found for hash slot {0}")]
    NoRouteForHash(u32),

    /// No failure rule matched
    #[error("No matching failure rule for (flags={flags}, host='{host}', reply_code='{reply_code}')")]
    NoFailureRule {
        flags: u32,
        host: String,
        reply_code: String,
    },

    /// Rewrite target host is empty (blocklisted destination)
    #[error("Rule has an empty host")]
    EmptyHost,

    /// Rewritten URI exceeds the maximum size
    #[error("Calculated URI size too large: {0}")]
    UriTooLong(usize),

    /// The request field selected as hash input was not supplied
    #[error("Could not hash request: missing {0}")]
    MissingHashInput(&'static str),
}

impl LookupError {
    /// True for ordinary negative answers ("no route"), false for system errors
    #[must_use]
    pub const fn is_miss(&self) -> bool {
        match self {
            Self::UnknownCarrier(_)
            | Self::UnknownDomain { .. }
            | Self::NoPrefixMatch(_)
            | Self::NoMatchingRuleset(_)
            | Self::EmptyRuleList
            | Self::AllRoutesOff
            | Self::AllDestinationsUsed
            | Self::NoRouteForHash(_)
            | Self::NoFailureRule { .. }
            | Self::EmptyHost => true,
            Self::Unavailable
            | Self::ZeroProbability
            | Self::UriTooLong(_)
            | Self::MissingHashInput(_) => false,
        }
    }
}

/// Stable codes for administrative failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminErrorCode {
    /// A value was given without a preceding flag
    NoOption,
    /// Unknown flag or unparsable value
    WrongOption,
    /// A flag forbidden for this command
    InvalidOption,
    /// A required flag is missing
    MissingOption,
    /// Help was requested
    Help,
    /// Automatic backup selection found nothing
    NoAutoBackup,
    /// No rule with the requested backup hash index
    NoHashBackup,
    /// No rule with the requested backup host
    NoHostBackup,
    /// The backup could not be linked
    AddBackup,
    /// The rule is a backup for other rules
    BackupInUse,
    /// The scratch snapshot could not be loaded
    LoadConfig,
    /// The scratch snapshot could not be written back
    SaveConfig,
    /// Fixup of the edited snapshot failed
    RuleFixup,
    /// No rule matched the filters
    NoUpdate,
    /// Domain name unknown to the name map
    UnknownDomain,
    /// The active source is not the flat file
    NotFileMode,
}

/// Administrative edit errors
#[derive(Debug, Error)]
pub enum AdminError {
    /// Option validation failed
    #[error("{message}")]
    Validation {
        code: AdminErrorCode,
        message: String,
    },

    /// Editing the scratch snapshot failed
    #[error("{message}")]
    Edit {
        code: AdminErrorCode,
        message: String,
    },

    /// Loading the scratch snapshot or reloading failed
    #[error("{context}: {source}")]
    Reload {
        code: AdminErrorCode,
        context: String,
        #[source]
        source: ReloadError,
    },

    /// Writing the edited snapshot back failed
    #[error("Could not save config: {0}")]
    Save(#[source] LoadError),
}

impl AdminError {
    /// Create a validation error
    pub fn validation(code: AdminErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// Create an edit error
    pub fn edit(code: AdminErrorCode, message: impl Into<String>) -> Self {
        Self::Edit {
            code,
            message: message.into(),
        }
    }

    /// The stable error code
    #[must_use]
    pub const fn code(&self) -> AdminErrorCode {
        match self {
            Self::Validation { code, .. } | Self::Edit { code, .. } | Self::Reload { code, .. } => {
                *code
            }
            Self::Save(_) => AdminErrorCode::SaveConfig,
        }
    }

    /// Status class of the error (400 caller mistake, 500 server side)
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self.code() {
            AdminErrorCode::Help => 200,
            AdminErrorCode::NoOption
            | AdminErrorCode::WrongOption
            | AdminErrorCode::InvalidOption
            | AdminErrorCode::MissingOption
            | AdminErrorCode::NoAutoBackup
            | AdminErrorCode::NoHashBackup
            | AdminErrorCode::NoHostBackup
            | AdminErrorCode::BackupInUse
            | AdminErrorCode::UnknownDomain
            | AdminErrorCode::NotFileMode => 400,
            AdminErrorCode::AddBackup
            | AdminErrorCode::LoadConfig
            | AdminErrorCode::SaveConfig
            | AdminErrorCode::RuleFixup
            | AdminErrorCode::NoUpdate => 500,
        }
    }

    /// Caller mistakes can be corrected and retried; server-side failures cannot
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.status() < 500
    }
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } | Self::BindError { .. } => false,
            Self::ConnectionError(_) | Self::ProtocolError(_) => true,
            Self::SerializationError(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}

/// Type alias for Result with `CarrierRouteError`
pub type Result<T> = std::result::Result<T, CarrierRouteError>;
