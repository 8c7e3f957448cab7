//! Hash inputs and selection modes.
//!
//! Rule selection is driven by a hash of one request field (Call-ID, From
//! or To URI or user) reduced modulo a denominator. The field values are
//! extracted by the caller and passed in as [`HashInputs`]; this module only
//! picks the field and hashes it with CRC32.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::LookupError;

/// Request field used as hash input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashSource {
    /// Call-ID header.
    #[default]
    CallId,
    /// From URI.
    FromUri,
    /// User part of the From URI.
    FromUser,
    /// To URI.
    ToUri,
    /// User part of the To URI.
    ToUser,
    /// Random number instead of a hash.
    Rand,
}

impl HashSource {
    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CallId => "call_id",
            Self::FromUri => "from_uri",
            Self::FromUser => "from_user",
            Self::ToUri => "to_uri",
            Self::ToUser => "to_user",
            Self::Rand => "rand",
        }
    }

    /// Hash the selected input into `0..denominator`.
    ///
    /// # Errors
    ///
    /// `ZeroProbability` if `denominator` is zero, `MissingHashInput` if the
    /// selected field was not supplied.
    pub fn hash(self, inputs: &HashInputs, denominator: u32) -> Result<u32, LookupError> {
        if denominator == 0 {
            return Err(LookupError::ZeroProbability);
        }
        let field = match self {
            Self::Rand => return Ok(rand::thread_rng().gen_range(0..denominator)),
            Self::CallId => inputs.call_id.as_deref(),
            Self::FromUri => inputs.from_uri.as_deref(),
            Self::FromUser => inputs.from_user.as_deref(),
            Self::ToUri => inputs.to_uri.as_deref(),
            Self::ToUser => inputs.to_user.as_deref(),
        };
        let field = field.ok_or(LookupError::MissingHashInput(self.as_str()))?;
        Ok(crc32(field) % denominator)
    }
}

impl fmt::Display for HashSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "call_id" => Ok(Self::CallId),
            "from_uri" => Ok(Self::FromUri),
            "from_user" => Ok(Self::FromUser),
            "to_uri" => Ok(Self::ToUri),
            "to_user" => Ok(Self::ToUser),
            "rand" => Ok(Self::Rand),
            other => Err(format!("unknown hash source '{other}'")),
        }
    }
}

/// How a rule is picked from a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Weighted pick with backup fallback.
    #[default]
    Weighted,
    /// Direct pick by hash index, no fallthrough.
    StrictHash,
}

/// Request field values available for hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInputs {
    /// Call-ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// From URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_uri: Option<String>,
    /// From user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<String>,
    /// To URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_uri: Option<String>,
    /// To user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user: Option<String>,
}

impl HashInputs {
    /// Inputs with only a Call-ID.
    pub fn with_call_id(call_id: impl Into<String>) -> Self {
        Self {
            call_id: Some(call_id.into()),
            ..Self::default()
        }
    }
}

/// CRC32 (IEEE) of a string.
#[inline]
#[must_use]
pub fn crc32(input: &str) -> u32 {
    crc32fast::hash(input.as_bytes())
}
