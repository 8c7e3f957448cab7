//! Integration tests for carrier-router
//!
//! This module contains integration tests for verifying the behavior of the
//! routing engine in realistic scenarios.
//!
//! # Test Organization
//!
//! - `lookup`: End-to-end routing and failure routing against built snapshots
//! - `reload`: Hot reload from a route file, failed reloads and draining readers
//! - `admin_file`: Administrative edits persisted to the route file
//! - `ipc`: Control socket round trips against a running server
//! - `properties`: Property tests for prefix matching and fixup
//!
//! # Test Requirements
//!
//! - Tests use temporary directories and Unix sockets, no network access

pub mod admin_file;
pub mod ipc;
pub mod lookup;
pub mod properties;
pub mod reload;

use std::path::PathBuf;

use tempfile::TempDir;

/// Route file shared by the file-based tests
pub const ROUTES: &str = r#"# carrier routes
domain proxy {
   prefix 49 {
      max_targets = 4
      target gw1.example.net {
         prob = 0.25
         hash_index = 1
         status = 1
         strip = 2
         rewrite_prefix = "0"
      }
      target gw2.example.net {
         prob = 0.25
         hash_index = 2
         status = 1
         strip = 2
         rewrite_prefix = "0"
      }
      target gw3.example.net {
         prob = 0.25
         hash_index = 3
         status = 1
      }
      target gw4.example.net {
         prob = 0.25
         hash_index = 4
         status = 1
      }
   }
   prefix 4930 {
      max_targets = 2
      target berlin-a.example.net {
         prob = 1
         hash_index = 1
         status = 0
         backup = 2
         comment = "maintenance"
      }
      target berlin-b.example.net {
         prob = 0
         hash_index = 2
         status = 1
      }
   }
   prefix NULL {
      max_targets = 1
      target catchall.example.net {
         prob = 1
         status = 1
      }
   }
}
domain emergency {
   prefix 11 {
      max_targets = 1
      target psap.example.net {
         prob = 1
         status = 1
      }
   }
}
"#;

/// Write `text` as `routes.conf` in a fresh temporary directory
pub fn write_routes(text: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("routes.conf");
    std::fs::write(&path, text).expect("write routes");
    (dir, path)
}
