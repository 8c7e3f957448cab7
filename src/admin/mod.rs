//! Administrative route edits.
//!
//! Operators add, delete, replace, activate and deactivate hosts with the
//! same `-flag value` options the control socket forwards. Edits are only
//! possible when routes come from a route file: the file is loaded into a
//! scratch snapshot, edited, written back and reloaded.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use carrier_router::admin::{AdminCommand, AdminMutator, AdminOptions};
//! use carrier_router::routing::RouteEngine;
//! use carrier_router::source::FileSource;
//!
//! let engine = RouteEngine::new(Arc::new(FileSource::new("/etc/carrier-router/routes.conf")));
//! engine.reload().unwrap();
//!
//! let opts = AdminOptions::parse_line(AdminCommand::Deactivate, "-d proxy -p 49 -h gw1 -t a").unwrap();
//! let outcome = AdminMutator::new(&engine).apply(&opts).unwrap();
//! println!("{} rule(s) updated, generation {}", outcome.updated, outcome.generation);
//! ```

mod mutator;
mod options;

pub use mutator::{edit_snapshot, AdminMutator, AdminOutcome};
pub use options::{AdminCommand, AdminFlag, AdminOptions, FlagSet, MAX_TOKENS, USAGE};
