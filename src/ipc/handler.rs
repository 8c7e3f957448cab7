//! IPC command handler
//!
//! This module processes IPC commands and generates responses.
//!
//! Lookups run inline on the connection task. Reloads and administrative
//! edits block on file I/O and on draining the superseded snapshot, so they
//! move to the blocking pool and are serialized by a writer lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::protocol::{ErrorCode, ErrorResponse, IpcCommand, IpcResponse, ServerStatus};
use crate::admin::{AdminCommand, AdminMutator, AdminOptions};
use crate::error::{AdminError, LookupError, ReloadError};
use crate::routing::{NextDomainRequest, RouteEngine, RouteRequest};

/// IPC command handler
pub struct IpcHandler {
    /// Route engine serving lookups
    engine: Arc<RouteEngine>,

    /// Serializes reloads and administrative edits
    writer: Mutex<()>,

    /// Server start time
    start_time: Instant,

    /// Server version
    version: String,

    /// Set once a shutdown command was accepted
    shutting_down: AtomicBool,

    /// Fired when a shutdown command is accepted
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcHandler {
    /// Create a new IPC handler
    pub fn new(engine: Arc<RouteEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            engine,
            writer: Mutex::new(()),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// The engine behind this handler
    #[must_use]
    pub fn engine(&self) -> &Arc<RouteEngine> {
        &self.engine
    }

    /// Receiver that fires when a client requests shutdown
    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether a shutdown command was accepted
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Handle an IPC command
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        if command.is_write() && self.is_shutting_down() {
            return IpcResponse::error(ErrorCode::ShuttingDown, "Server is shutting down");
        }

        if let Some((admin, args)) = command.admin() {
            return self.handle_admin(admin, args).await;
        }

        match command {
            IpcCommand::Ping => IpcResponse::Pong,

            IpcCommand::Status => self.handle_status(),

            IpcCommand::ReloadRoutes => self.reload().await,

            IpcCommand::DumpRoutes => self.handle_dump(),

            IpcCommand::TestRoute { request } => self.handle_test_route(&request),

            IpcCommand::TestNextDomain { request } => self.handle_test_next_domain(&request),

            IpcCommand::Shutdown => self.handle_shutdown(),

            IpcCommand::AddHost { .. }
            | IpcCommand::DeleteHost { .. }
            | IpcCommand::ReplaceHost { .. }
            | IpcCommand::ActivateHost { .. }
            | IpcCommand::DeactivateHost { .. } => {
                IpcResponse::error(ErrorCode::InternalError, "unrouted administrative command")
            }
        }
    }

    /// Handle status command
    fn handle_status(&self) -> IpcResponse {
        IpcResponse::Status(ServerStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            source: self.engine.source().describe(),
            match_mode: self.engine.match_mode(),
            generation: self.engine.generation(),
            stats: self.engine.stats(),
            shutting_down: self.is_shutting_down(),
        })
    }

    /// Reload routes from the source.
    ///
    /// Takes the writer lock, so a reload never interleaves with an
    /// administrative edit. Every reload trigger of the daemon goes through
    /// here.
    pub async fn reload(&self) -> IpcResponse {
        let _writer = self.writer.lock().await;
        info!("Reloading routes from {}", self.engine.source().describe());

        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || engine.reload()).await {
            Ok(Ok(report)) => {
                info!(
                    generation = report.generation,
                    load_time_us = report.load_time_us,
                    drain_time_us = report.drain_time_us,
                    "Routes reloaded"
                );
                IpcResponse::Reloaded(report)
            }
            Ok(Err(e)) => reload_error(&e),
            Err(e) => IpcResponse::error(ErrorCode::InternalError, format!("Reload task failed: {e}")),
        }
    }

    /// Handle dump command
    fn handle_dump(&self) -> IpcResponse {
        match self.engine.dump() {
            Ok(dump) => {
                let text = dump.to_string();
                IpcResponse::Dump { dump, text }
            }
            Err(e) => lookup_error(&e),
        }
    }

    /// Handle administrative edits
    async fn handle_admin(&self, command: AdminCommand, args: &[String]) -> IpcResponse {
        let opts = match AdminOptions::parse(command, args) {
            Ok(opts) => opts,
            Err(e) => return admin_error(&e),
        };

        let _writer = self.writer.lock().await;
        info!(command = %command, args = ?args, "Applying administrative edit");

        let engine = Arc::clone(&self.engine);
        let result =
            tokio::task::spawn_blocking(move || AdminMutator::new(&engine).apply(&opts)).await;
        match result {
            Ok(Ok(outcome)) => IpcResponse::Admin(outcome),
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Administrative edit failed");
                admin_error(&e)
            }
            Err(e) => IpcResponse::error(ErrorCode::InternalError, format!("Edit task failed: {e}")),
        }
    }

    /// Handle test route command
    fn handle_test_route(&self, request: &RouteRequest) -> IpcResponse {
        match self.engine.route(request) {
            Ok(decision) => IpcResponse::Route(decision),
            Err(e) => lookup_error(&e),
        }
    }

    /// Handle test next domain command
    fn handle_test_next_domain(&self, request: &NextDomainRequest) -> IpcResponse {
        match self.engine.next_domain(request) {
            Ok(next) => IpcResponse::NextDomain(next),
            Err(e) => lookup_error(&e),
        }
    }

    /// Handle shutdown command
    fn handle_shutdown(&self) -> IpcResponse {
        info!("Shutdown requested over IPC");
        self.shutting_down.store(true, Ordering::Release);
        // no receivers only means nobody is waiting for the signal
        let _ = self.shutdown_tx.send(());
        IpcResponse::success_with_message("Shutdown initiated")
    }
}

fn lookup_error(e: &LookupError) -> IpcResponse {
    let code = match e {
        LookupError::Unavailable => ErrorCode::NotLoaded,
        e if e.is_miss() => ErrorCode::NoRoute,
        _ => ErrorCode::LookupFailed,
    };
    IpcResponse::error(code, e.to_string())
}

fn reload_error(e: &ReloadError) -> IpcResponse {
    IpcResponse::error(ErrorCode::ReloadFailed, e.to_string())
}

fn admin_error(e: &AdminError) -> IpcResponse {
    IpcResponse::Error(ErrorResponse {
        code: ErrorCode::AdminFailed,
        status: e.status(),
        message: e.to_string(),
        admin_code: Some(e.code()),
    })
}
