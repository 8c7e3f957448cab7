//! Route sources.
//!
//! A route source populates a [`SnapshotBuilder`] from some external store.
//! It registers carriers and domains and adds rules; it never resolves hash
//! indices, thresholds or backup links (the fixup pass does that). Sources
//! that can be written back also implement [`RouteSource::store`], which is
//! what administrative edits require.

mod file;
mod format;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::routing::{RouteSnapshot, SnapshotBuilder};

pub use file::{snapshot_to_file, FileSource, FILE_CARRIER};
pub use format::{parse_route_file, render_route_file, DomainBlock, PrefixBlock, RouteFile, TargetBlock};

/// Kind of backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Flat route file; supports administrative edits.
    File,
    /// Database tables.
    Database,
    /// Data assembled in code.
    Static,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Database => "database",
            Self::Static => "static",
        })
    }
}

/// Loader contract.
pub trait RouteSource: Send + Sync {
    /// Kind of backing store.
    fn kind(&self) -> SourceKind;

    /// Human readable location, for logs and errors.
    fn describe(&self) -> String;

    /// Populate a fresh builder.
    ///
    /// # Errors
    ///
    /// Any `LoadError`; the builder is discarded by the caller.
    fn load(&self, builder: &mut SnapshotBuilder) -> Result<(), LoadError>;

    /// Write a (fixed up) snapshot back to the store.
    ///
    /// # Errors
    ///
    /// `LoadError::ReadOnly` unless the source supports writing.
    fn store(&self, _snapshot: &RouteSnapshot) -> Result<(), LoadError> {
        Err(LoadError::ReadOnly(self.describe()))
    }
}

/// Source backed by a closure.
///
/// # Example
///
/// ```
/// use carrier_router::routing::RouteSpec;
/// use carrier_router::source::{FnSource, RouteSource, SourceKind};
///
/// let source = FnSource::new(|b| {
///     let c = b.add_carrier("default");
///     let d = b.add_domain(c, "proxy")?;
///     b.add_route(RouteSpec::new(c, d, "", "gw"))
/// });
/// assert_eq!(source.kind(), SourceKind::Static);
/// ```
pub struct FnSource<F> {
    load: F,
    kind: SourceKind,
}

impl<F> FnSource<F>
where
    F: Fn(&mut SnapshotBuilder) -> Result<(), LoadError> + Send + Sync,
{
    /// Static source calling `load` on every reload.
    pub const fn new(load: F) -> Self {
        Self {
            load,
            kind: SourceKind::Static,
        }
    }

    /// Report a different source kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }
}

impl<F> RouteSource for FnSource<F>
where
    F: Fn(&mut SnapshotBuilder) -> Result<(), LoadError> + Send + Sync,
{
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("{} source", self.kind)
    }

    fn load(&self, builder: &mut SnapshotBuilder) -> Result<(), LoadError> {
        (self.load)(builder)
    }
}
