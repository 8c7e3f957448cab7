//! carrier-router: Carrier and least-cost routing decision engine
//!
//! This crate decides, for a dialed number, which carrier gateway a SIP
//! proxy should route a call to, and where to fail over when that gateway
//! answers with an error.
//!
//! # Features
//!
//! - **Prefix Routing**: Longest-prefix match over digit or ASCII tries
//! - **Weighted and Hashed Selection**: CRC32 over a request field, either
//!   weighted by rule probability or as a strict hash slot
//! - **Backup Routes**: Inactive rules fall back to a named backup rule
//! - **Failure Routing**: Next domain by tried host, reply code and flags
//! - **Hot Reload**: Snapshots are swapped atomically and the previous one
//!   drains while lookups continue
//! - **Administrative Edits**: Add, delete, replace, activate and deactivate
//!   hosts in the route file at runtime
//! - **IPC Control**: Unix socket-based runtime control
//!
//! # Architecture
//!
//! ```text
//! RouteSource (route file) → SnapshotBuilder → fixup → RouteEngine (ArcSwap)
//!                                                          ↓
//!                         SIP proxy ── RouteRequest ──→ RouteDecision (sip:user@host)
//!                                                          ↑
//!                    IpcServer ── reload / dump / add_host ... ── AdminMutator
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use carrier_router::routing::{HashInputs, HashSource, RouteEngine, RouteRequest};
//! use carrier_router::source::FileSource;
//!
//! let engine = RouteEngine::new(Arc::new(FileSource::new("/etc/carrier-router/routes.conf")));
//! engine.reload()?;
//!
//! let request = RouteRequest::new("default", "proxy", "4930123456")
//!     .with_hash(HashSource::CallId, HashInputs::with_call_id("a84b4c76e66710"));
//! match engine.route(&request) {
//!     Ok(decision) => println!("route to {}", decision.uri),
//!     Err(e) if e.is_miss() => println!("no route"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok::<(), carrier_router::CarrierRouteError>(())
//! ```
//!
//! # Modules
//!
//! - [`admin`]: Administrative option parsing and route file edits
//! - [`config`]: Daemon configuration types and loading
//! - [`error`]: Error types
//! - [`ipc`]: IPC server and protocol
//! - [`routing`]: Tries, rules, snapshots and the route engine
//! - [`source`]: Route sources and the route file format

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod admin;
pub mod config;
pub mod error;
pub mod ipc;
pub mod routing;
pub mod source;

// Re-export commonly used types at the crate root
pub use admin::{AdminCommand, AdminMutator, AdminOptions};
pub use config::Config;
pub use error::{
    AdminError, CarrierRouteError, ConfigError, FixupError, IpcError, LoadError, LookupError,
    ReloadError,
};
pub use ipc::{IpcClient, IpcCommand, IpcResponse, IpcServer};
pub use routing::{
    HashInputs, HashSource, MatchMode, NextDomainRequest, RouteDecision, RouteEngine,
    RouteRequest, RouteSnapshot, SelectionMode,
};
pub use source::{FileSource, RouteSource};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
