//! Lookup requests and results.
//!
//! A [`RouteRequest`] names a carrier and a domain (by id or by name), the
//! number to match against the prefix trie, the user part to rewrite, the
//! request flags and how to hash. The result is a [`RouteDecision`]
//! carrying the selected rewrite and the resulting request URI.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::hash::{HashInputs, HashSource, SelectionMode};
use super::rule::Rule;
use crate::error::LookupError;

/// Upper bound for a rewritten request URI.
pub const MAX_URI_SIZE: usize = 1024;

/// Carrier or domain selector.
///
/// A selector given as text is an id if it parses as an integer, a name
/// otherwise. Carrier id 0 means the default carrier.
///
/// # Example
///
/// ```
/// use carrier_router::routing::Selector;
///
/// assert_eq!(Selector::parse("2"), Selector::Id(2));
/// assert_eq!(Selector::parse("premium"), Selector::Name("premium".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    /// Numeric id.
    Id(u32),
    /// Name resolved through the snapshot's name map.
    Name(String),
}

impl Selector {
    /// Parse a textual selector.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        s.trim()
            .parse::<u32>()
            .map_or_else(|_| Self::Name(s.to_string()), Self::Id)
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::Id(0)
    }
}

impl From<u32> for Selector {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Engine-wide lookup behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Route unknown carriers through the default carrier.
    pub fallback_default: bool,
    /// Honor the request's used destination list in weighted mode.
    pub avoid_failed_destinations: bool,
}

/// Normal routing request.
///
/// # Example
///
/// ```
/// use carrier_router::routing::{HashInputs, HashSource, RouteRequest, SelectionMode};
///
/// let request = RouteRequest::new("default", "proxy", "+49301234")
///     .with_flags(0x4)
///     .with_hash(HashSource::CallId, HashInputs::with_call_id("abc@host"))
///     .with_mode(SelectionMode::StrictHash);
///
/// assert_eq!(request.rewrite_user, "+49301234");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Carrier selector.
    #[serde(default)]
    pub carrier: Selector,
    /// Domain selector.
    pub domain: Selector,
    /// Number matched against the prefix trie.
    pub prefix_matching: String,
    /// User part of the rewritten URI.
    pub rewrite_user: String,
    /// Request flags.
    #[serde(default)]
    pub flags: u32,
    /// Hash input field.
    #[serde(default)]
    pub hash_source: HashSource,
    /// Field values for hashing.
    #[serde(default)]
    pub inputs: HashInputs,
    /// Selection mode.
    #[serde(default)]
    pub mode: SelectionMode,
    /// Hosts already tried for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_destinations: Option<Vec<String>>,
    /// Build a `sips:` URI.
    #[serde(default)]
    pub secure: bool,
}

impl RouteRequest {
    /// Request that matches and rewrites `number`.
    pub fn new(
        carrier: impl Into<Selector>,
        domain: impl Into<Selector>,
        number: impl Into<String>,
    ) -> Self {
        let number = number.into();
        Self {
            carrier: carrier.into(),
            domain: domain.into(),
            prefix_matching: number.clone(),
            rewrite_user: number,
            flags: 0,
            hash_source: HashSource::default(),
            inputs: HashInputs::default(),
            mode: SelectionMode::default(),
            used_destinations: None,
            secure: false,
        }
    }

    /// Set the request flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the hash field and its inputs.
    #[must_use]
    pub fn with_hash(mut self, source: HashSource, inputs: HashInputs) -> Self {
        self.hash_source = source;
        self.inputs = inputs;
        self
    }

    /// Set the selection mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set a rewrite user different from the matched number.
    #[must_use]
    pub fn with_rewrite_user(mut self, user: impl Into<String>) -> Self {
        self.rewrite_user = user.into();
        self
    }

    /// Set the hosts already tried.
    #[must_use]
    pub fn with_used_destinations(mut self, hosts: Vec<String>) -> Self {
        self.used_destinations = Some(hosts);
        self
    }

    /// Request a `sips:` URI.
    #[must_use]
    pub const fn secure(mut self) -> Self {
        self.secure = true;
        self
    }
}

/// Selected rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Carrier the request was routed in.
    pub carrier_id: u32,
    /// Domain the request was routed in.
    pub domain_id: u32,
    /// Trie prefix that matched.
    pub matched_prefix: String,
    /// Hash index of the selected rule.
    pub hash_index: u32,
    /// Rewrite host; also the value to append to the used destination list.
    pub host: String,
    /// Characters stripped from the user part.
    pub strip: u32,
    /// Local prefix.
    pub local_prefix: String,
    /// Local suffix.
    pub local_suffix: String,
    /// Rule comment.
    pub comment: String,
    /// True if an inactive rule was replaced by its backup.
    pub via_backup: bool,
    /// Rewritten request URI.
    pub uri: String,
}

impl RouteDecision {
    pub(crate) fn from_rule(
        carrier_id: u32,
        domain_id: u32,
        rule: &Rule,
        via_backup: bool,
        user: &str,
        secure: bool,
    ) -> Result<Self, LookupError> {
        let mut decision = Self {
            carrier_id,
            domain_id,
            matched_prefix: rule.prefix.clone(),
            hash_index: rule.hash_index,
            host: rule.host.clone(),
            strip: rule.strip,
            local_prefix: rule.local_prefix.clone(),
            local_suffix: rule.local_suffix.clone(),
            comment: rule.comment.clone(),
            via_backup,
            uri: String::new(),
        };
        decision.uri = decision.rewrite_uri(user, secure)?;
        Ok(decision)
    }

    /// Build `sip[s]:<local_prefix><user minus strip><local_suffix>@<host>`.
    ///
    /// An empty user (or `<null>`) yields `sip[s]:<host>`.
    ///
    /// # Errors
    ///
    /// `EmptyHost` for a blocklisted destination, `UriTooLong` if the result
    /// exceeds [`MAX_URI_SIZE`].
    pub fn rewrite_uri(&self, user: &str, secure: bool) -> Result<String, LookupError> {
        if self.host.is_empty() {
            return Err(LookupError::EmptyHost);
        }
        let user = if user == "<null>" { "" } else { user };

        let mut uri = String::with_capacity(
            5 + self.local_prefix.len() + user.len() + self.local_suffix.len() + 1 + self.host.len(),
        );
        uri.push_str(if secure { "sips:" } else { "sip:" });
        if !user.is_empty() {
            let rest = user
                .char_indices()
                .nth(self.strip as usize)
                .map_or("", |(i, _)| &user[i..]);
            uri.push_str(&self.local_prefix);
            uri.push_str(rest);
            uri.push_str(&self.local_suffix);
            uri.push('@');
        }
        uri.push_str(&self.host);

        if uri.len() > MAX_URI_SIZE {
            return Err(LookupError::UriTooLong(uri.len()));
        }
        Ok(uri)
    }
}

/// Failure routing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextDomainRequest {
    /// Carrier selector.
    #[serde(default)]
    pub carrier: Selector,
    /// Domain selector.
    pub domain: Selector,
    /// Number matched against the failure trie.
    pub prefix_matching: String,
    /// Last tried host.
    pub host: String,
    /// Reply code of the failed attempt.
    pub reply_code: String,
    /// Request flags.
    #[serde(default)]
    pub flags: u32,
}

impl NextDomainRequest {
    /// Failure request without flags.
    pub fn new(
        carrier: impl Into<Selector>,
        domain: impl Into<Selector>,
        number: impl Into<String>,
        host: impl Into<String>,
        reply_code: impl Into<String>,
    ) -> Self {
        Self {
            carrier: carrier.into(),
            domain: domain.into(),
            prefix_matching: number.into(),
            host: host.into(),
            reply_code: reply_code.into(),
            flags: 0,
        }
    }

    /// Set the request flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

/// Domain to continue routing in after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextDomain {
    /// Next domain id.
    pub domain_id: u32,
    /// Next domain name, if known.
    pub domain: Option<String>,
    /// Failure rule prefix that matched.
    pub matched_prefix: String,
    /// Failure rule comment.
    pub comment: String,
}
