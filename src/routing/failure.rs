//! Failure routing rules.
//!
//! When a call attempt fails, the failure trie decides which routing domain
//! to try next, based on the last tried host, the reply code and the request
//! flags. Rules at one trie node are kept ordered by decreasing specificity,
//! so the first match is the most specific one.

use std::cmp::Ordering;

use crate::error::LoadError;

/// One failure routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRule {
    /// Prefix the rule is registered under.
    pub prefix: String,
    /// Last tried host; empty matches any host.
    pub host: String,
    /// Reply code pattern, `.` matches any digit; empty matches any code.
    pub reply_code: String,
    /// Selector flags.
    pub flags: u32,
    /// Selector mask.
    pub mask: u32,
    /// Domain to continue routing in.
    pub next_domain: u32,
    /// Free-form comment.
    pub comment: String,
}

impl FailureRule {
    fn wildcards(&self) -> usize {
        self.reply_code.bytes().filter(|&b| b == b'.').count()
    }

    /// Ordering by specificity, most specific first.
    ///
    /// A rule with a host beats one without, fewer reply code wildcards beat
    /// more, and a wider mask breaks the remaining ties.
    fn priority_cmp(&self, other: &Self) -> Ordering {
        self.host
            .is_empty()
            .cmp(&other.host.is_empty())
            .then_with(|| self.wildcards().cmp(&other.wildcards()))
            .then_with(|| other.mask.cmp(&self.mask))
    }

    /// True if this rule accepts the given failure.
    #[must_use]
    pub fn matches(&self, flags: u32, host: &str, reply_code: &str) -> bool {
        flags & self.mask == self.flags
            && (self.host.is_empty() || self.host == host)
            && reply_code_matches(&self.reply_code, reply_code)
    }
}

/// Reply code pattern accepting every code.
pub const ANY_REPLY_CODE: &str = "...";

/// Position-wise reply code match with `.` as single digit wildcard.
#[must_use]
pub fn reply_code_matches(pattern: &str, code: &str) -> bool {
    pattern.len() == code.len()
        && pattern
            .bytes()
            .zip(code.bytes())
            .all(|(p, c)| p == b'.' || p == c)
}

/// Loader input for one failure rule.
///
/// # Example
///
/// ```
/// use carrier_router::routing::FailureRouteSpec;
///
/// let spec = FailureRouteSpec::new(1, 1, "49", 2)
///     .with_host("10.0.0.1")
///     .with_reply_code("486");
/// assert_eq!(spec.next_domain, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRouteSpec {
    /// Carrier id.
    pub carrier: u32,
    /// Domain id.
    pub domain: u32,
    /// Prefix.
    pub prefix: String,
    /// Last tried host pattern.
    pub host: String,
    /// Reply code pattern.
    pub reply_code: String,
    /// Selector flags.
    pub flags: u32,
    /// Selector mask.
    pub mask: u32,
    /// Next domain id.
    pub next_domain: u32,
    /// Comment.
    pub comment: String,
}

impl FailureRouteSpec {
    /// Rule matching any host and reply code.
    pub fn new(carrier: u32, domain: u32, prefix: impl Into<String>, next_domain: u32) -> Self {
        Self {
            carrier,
            domain,
            prefix: prefix.into(),
            host: String::new(),
            reply_code: ANY_REPLY_CODE.to_string(),
            flags: 0,
            mask: 0,
            next_domain,
            comment: String::new(),
        }
    }

    /// Set the host pattern.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the reply code pattern.
    #[must_use]
    pub fn with_reply_code(mut self, reply_code: impl Into<String>) -> Self {
        self.reply_code = reply_code.into();
        self
    }

    /// Set the selector.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32, mask: u32) -> Self {
        self.flags = flags;
        self.mask = mask;
        self
    }

    /// Set the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Priority-ordered failure rules of one trie node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureRuleList {
    rules: Vec<FailureRule>,
}

impl FailureRuleList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Rules in priority order.
    #[must_use]
    pub fn rules(&self) -> &[FailureRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Insert a rule behind all rules of equal or higher priority.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidReplyCode` unless the reply code is exactly
    /// three digits or `.` wildcards.
    pub fn insert(&mut self, spec: FailureRouteSpec) -> Result<(), LoadError> {
        let valid = spec.reply_code.len() == 3
            && spec
                .reply_code
                .bytes()
                .all(|b| b == b'.' || b.is_ascii_digit());
        if !valid {
            return Err(LoadError::InvalidReplyCode(spec.reply_code));
        }

        let rule = FailureRule {
            prefix: spec.prefix,
            host: spec.host,
            reply_code: spec.reply_code,
            flags: spec.flags,
            mask: spec.mask,
            next_domain: spec.next_domain,
            comment: spec.comment,
        };
        let pos = self
            .rules
            .partition_point(|r| r.priority_cmp(&rule) != Ordering::Greater);
        self.rules.insert(pos, rule);
        Ok(())
    }

    /// First rule accepting the failure.
    #[must_use]
    pub fn find(&self, flags: u32, host: &str, reply_code: &str) -> Option<&FailureRule> {
        self.rules
            .iter()
            .find(|r| r.matches(flags, host, reply_code))
    }
}
