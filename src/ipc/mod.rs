//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server for controlling
//! the routing engine at runtime: reloading routes, dumping them, editing
//! hosts and running test lookups.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use carrier_router::admin::AdminCommand;
//! use carrier_router::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/carrier-router.sock");
//!
//! if let IpcResponse::Reloaded(report) = client.send(IpcCommand::ReloadRoutes).await? {
//!     println!("generation {} live", report.generation);
//! }
//!
//! let response = client
//!     .admin(AdminCommand::Deactivate, "-d proxy -p 49 -h gw1 -t a")
//!     .await?;
//! if let IpcResponse::Error(err) = response {
//!     eprintln!("{} ({})", err.message, err.status);
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, ErrorResponse, IpcCommand, IpcResponse,
    ServerStatus, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
