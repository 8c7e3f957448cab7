//! Option parsing for administrative commands.
//!
//! Each command takes a flat token list of `-flag value` pairs:
//!
//! | flag | meaning |
//! |---|---|
//! | `-d` | searched/new domain |
//! | `-p` | searched/new prefix (`NULL` is the empty prefix) |
//! | `-h` | searched/new host |
//! | `-t` | replacement/backup host |
//! | `-w` | searched/new weight (0..1) |
//! | `-P` | new rewrite prefix |
//! | `-S` | new rewrite suffix |
//! | `-i` | new hash index |
//! | `-?` | help |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AdminError, AdminErrorCode};

/// Only this many tokens are considered.
pub const MAX_TOKENS: usize = 20;

/// Text returned for `-?`.
pub const USAGE: &str = "carrierroute options usage:
\t-h searched/new remote host
\t-t replacement/backup host
\t-d: searched/new domain
\t-p: searched/new prefix
\t-w: searched/new weight (0..1)
\t-P: new rewrite prefix
\t-S: new rewrite suffix
\t-i: new hash index
\t-?: prints this help";

/// Administrative command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminCommand {
    /// Append a rule.
    Add,
    /// Remove rules.
    Delete,
    /// Change the host of rules.
    Replace,
    /// Switch rules off, optionally with a backup.
    Deactivate,
    /// Switch rules on.
    Activate,
}

impl AdminCommand {
    /// Command name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add_host",
            Self::Delete => "delete_host",
            Self::Replace => "replace_host",
            Self::Deactivate => "deactivate_host",
            Self::Activate => "activate_host",
        }
    }

    /// Required flags.
    #[must_use]
    pub const fn required(self) -> FlagSet {
        use AdminFlag::{Domain, Host, Prefix, Target, Weight};
        match self {
            Self::Add => FlagSet::of(&[Domain, Prefix, Host, Weight]),
            Self::Delete | Self::Deactivate | Self::Activate => FlagSet::of(&[Host, Domain, Prefix]),
            Self::Replace => FlagSet::of(&[Host, Target]),
        }
    }

    /// Optional flags.
    #[must_use]
    pub const fn optional(self) -> FlagSet {
        use AdminFlag::{Domain, HashIndex, Prefix, RewritePrefix, RewriteSuffix, Target, Weight};
        match self {
            Self::Add => FlagSet::of(&[RewritePrefix, RewriteSuffix, HashIndex]),
            Self::Delete | Self::Activate => FlagSet::of(&[Weight]),
            Self::Replace => FlagSet::of(&[Prefix, Domain, Weight]),
            Self::Deactivate => FlagSet::of(&[Weight, Target]),
        }
    }

    /// Forbidden flags.
    #[must_use]
    pub const fn forbidden(self) -> FlagSet {
        use AdminFlag::{HashIndex, RewritePrefix, RewriteSuffix, Target};
        match self {
            Self::Add => FlagSet::of(&[Target]),
            Self::Delete | Self::Activate => {
                FlagSet::of(&[RewritePrefix, RewriteSuffix, Target, HashIndex])
            }
            Self::Replace | Self::Deactivate => FlagSet::of(&[RewritePrefix, RewriteSuffix, HashIndex]),
        }
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One option flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdminFlag {
    /// `-d`
    Domain = 0,
    /// `-p`
    Prefix = 1,
    /// `-h`
    Host = 2,
    /// `-t`
    Target = 3,
    /// `-w`
    Weight = 4,
    /// `-P`
    RewritePrefix = 5,
    /// `-S`
    RewriteSuffix = 6,
    /// `-i`
    HashIndex = 7,
}

impl AdminFlag {
    /// Flag for an option character.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'd' => Some(Self::Domain),
            'p' => Some(Self::Prefix),
            'h' => Some(Self::Host),
            't' => Some(Self::Target),
            'w' => Some(Self::Weight),
            'P' => Some(Self::RewritePrefix),
            'S' => Some(Self::RewriteSuffix),
            'i' => Some(Self::HashIndex),
            _ => None,
        }
    }

    /// Option character.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Domain => 'd',
            Self::Prefix => 'p',
            Self::Host => 'h',
            Self::Target => 't',
            Self::Weight => 'w',
            Self::RewritePrefix => 'P',
            Self::RewriteSuffix => 'S',
            Self::HashIndex => 'i',
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of option flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlagSet(u8);

impl FlagSet {
    const ALL: [AdminFlag; 8] = [
        AdminFlag::Domain,
        AdminFlag::Prefix,
        AdminFlag::Host,
        AdminFlag::Target,
        AdminFlag::Weight,
        AdminFlag::RewritePrefix,
        AdminFlag::RewriteSuffix,
        AdminFlag::HashIndex,
    ];

    /// Set of the given flags.
    #[must_use]
    pub const fn of(flags: &[AdminFlag]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < flags.len() {
            bits |= flags[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// True if `flag` is in the set.
    #[must_use]
    pub const fn contains(self, flag: AdminFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Add a flag.
    pub fn insert(&mut self, flag: AdminFlag) {
        self.0 |= flag.bit();
    }

    /// Flags in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Flags of `self` not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True if empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags in declaration order.
    pub fn iter(self) -> impl Iterator<Item = AdminFlag> {
        Self::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "-{}", flag.as_char())?;
            first = false;
        }
        Ok(())
    }
}

/// Parsed and validated options of one administrative command.
///
/// # Example
///
/// ```
/// use carrier_router::admin::{AdminCommand, AdminOptions};
///
/// let opts = AdminOptions::parse_line(
///     AdminCommand::Deactivate,
///     "-d proxy -p 49 -h gw1.example.net -t a",
/// )
/// .unwrap();
/// assert_eq!(opts.domain.as_deref(), Some("proxy"));
/// assert_eq!(opts.target.as_deref(), Some("a"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdminOptions {
    /// Command the options belong to.
    pub command: AdminCommand,
    /// `-d`
    pub domain: Option<String>,
    /// `-p`, empty for `NULL`
    pub prefix: Option<String>,
    /// `-h`
    pub host: Option<String>,
    /// `-t`
    pub target: Option<String>,
    /// `-w`
    pub weight: Option<f64>,
    /// `-P`
    pub rewrite_prefix: Option<String>,
    /// `-S`
    pub rewrite_suffix: Option<String>,
    /// `-i`
    pub hash_index: Option<u32>,
    used: FlagSet,
}

impl AdminOptions {
    fn empty(command: AdminCommand) -> Self {
        Self {
            command,
            domain: None,
            prefix: None,
            host: None,
            target: None,
            weight: None,
            rewrite_prefix: None,
            rewrite_suffix: None,
            hash_index: None,
            used: FlagSet::default(),
        }
    }

    /// Flags that were given.
    #[must_use]
    pub const fn used(&self) -> FlagSet {
        self.used
    }

    /// Parse whitespace separated tokens.
    ///
    /// # Errors
    ///
    /// See [`AdminOptions::parse`].
    pub fn parse_line(command: AdminCommand, line: &str) -> Result<Self, AdminError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::parse(command, &tokens)
    }

    /// Parse and validate a token list.
    ///
    /// # Errors
    ///
    /// An `AdminError::Validation` with code `NoOption`, `WrongOption`,
    /// `InvalidOption`, `MissingOption` or `Help` (carrying the usage text).
    pub fn parse<S: AsRef<str>>(command: AdminCommand, tokens: &[S]) -> Result<Self, AdminError> {
        let mut opts = Self::empty(command);
        let mut pending: Option<AdminFlag> = None;

        for token in tokens.iter().take(MAX_TOKENS).map(AsRef::as_ref) {
            // A pending flag takes anything that is not itself an option as
            // its value, so `-w -0.5` reaches the weight check.
            if !names_option(token) {
                if let Some(flag) = pending.take() {
                    opts.set(flag, token)?;
                    continue;
                }
            }
            if let Some(option) = token.strip_prefix('-').filter(|o| !o.is_empty()) {
                let mut chars = option.chars();
                let c = chars.next().unwrap_or('-');
                if c == '?' {
                    return Err(AdminError::validation(AdminErrorCode::Help, USAGE));
                }
                let flag = AdminFlag::from_char(c)
                    .filter(|_| chars.next().is_none())
                    .ok_or_else(|| {
                        AdminError::validation(
                            AdminErrorCode::WrongOption,
                            format!("Bad parameter: unknown option '{token}'"),
                        )
                    })?;
                if let Some(previous) = pending {
                    return Err(missing_value(previous));
                }
                pending = Some(flag);
                continue;
            }

            let Some(flag) = pending.take() else {
                return Err(AdminError::validation(
                    AdminErrorCode::NoOption,
                    format!("No option given for value '{token}'"),
                ));
            };
            opts.set(flag, token)?;
        }

        if let Some(flag) = pending {
            return Err(missing_value(flag));
        }

        let forbidden = opts.used.intersection(command.forbidden());
        if !forbidden.is_empty() {
            return Err(AdminError::validation(
                AdminErrorCode::InvalidOption,
                format!("Bad parameter: {forbidden} not allowed for {command}"),
            ));
        }
        let missing = command.required().difference(opts.used);
        if !missing.is_empty() {
            return Err(AdminError::validation(
                AdminErrorCode::MissingOption,
                format!("Missing parameter: {missing} required for {command}"),
            ));
        }
        Ok(opts)
    }

    fn set(&mut self, flag: AdminFlag, value: &str) -> Result<(), AdminError> {
        let wrong = |what: &str| {
            AdminError::validation(
                AdminErrorCode::WrongOption,
                format!("Bad parameter: invalid {what} '{value}'"),
            )
        };
        match flag {
            AdminFlag::Domain => self.domain = Some(value.to_string()),
            AdminFlag::Prefix => {
                self.prefix = Some(if value.eq_ignore_ascii_case("NULL") {
                    String::new()
                } else {
                    value.to_string()
                });
            }
            AdminFlag::Host => self.host = Some(value.to_string()),
            AdminFlag::Target => self.target = Some(value.to_string()),
            AdminFlag::Weight => {
                let weight: f64 = value.parse().map_err(|_| wrong("weight"))?;
                if !(0.0..=1.0).contains(&weight) {
                    return Err(wrong("weight"));
                }
                self.weight = Some(weight);
            }
            AdminFlag::RewritePrefix => self.rewrite_prefix = Some(value.to_string()),
            AdminFlag::RewriteSuffix => self.rewrite_suffix = Some(value.to_string()),
            AdminFlag::HashIndex => {
                self.hash_index = Some(value.parse().map_err(|_| wrong("hash index"))?);
            }
        }
        self.used.insert(flag);
        Ok(())
    }
}

/// True for `-?` and the known single letter options.
fn names_option(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('-')
        && chars
            .next()
            .is_some_and(|c| c == '?' || AdminFlag::from_char(c).is_some())
        && chars.next().is_none()
}

fn missing_value(flag: AdminFlag) -> AdminError {
    AdminError::validation(
        AdminErrorCode::MissingOption,
        format!("Missing parameter: no value for -{}", flag.as_char()),
    )
}
