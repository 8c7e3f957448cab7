//! IPC Server
//!
//! This module provides a Unix socket server for IPC communication and the
//! matching client used by the daemon's control commands.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::handler::IpcHandler;
use super::protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcResponse, LENGTH_PREFIX_SIZE,
    MAX_MESSAGE_SIZE,
};
use crate::admin::AdminCommand;
use crate::config::IpcConfig;
use crate::error::IpcError;

/// IPC server for handling control commands
pub struct IpcServer {
    /// Configuration
    config: IpcConfig,

    /// Command handler
    handler: Arc<IpcHandler>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(config: IpcConfig, handler: Arc<IpcHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Run the IPC server
    ///
    /// This starts listening on the Unix socket and handles incoming connections.
    pub async fn run(&self) -> Result<(), IpcError> {
        if !self.config.enabled {
            info!("IPC server disabled");
            return Ok(());
        }

        let socket_path = &self.config.socket_path;

        // Remove existing socket file if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(|e| IpcError::SocketCreation {
                path: socket_path.display().to_string(),
                reason: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        // Create parent directory if needed
        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| IpcError::SocketCreation {
                    path: socket_path.display().to_string(),
                    reason: format!("Failed to create parent directory: {}", e),
                })?;
            }
        }

        // Create Unix listener
        let listener = UnixListener::bind(socket_path).map_err(|e| IpcError::BindError {
            path: socket_path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Set socket permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(self.config.socket_mode);
            std::fs::set_permissions(socket_path, permissions).map_err(|e| {
                IpcError::SocketCreation {
                    path: socket_path.display().to_string(),
                    reason: format!("Failed to set permissions: {}", e),
                }
            })?;
        }

        info!("IPC server listening on {:?}", socket_path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let max_size = self.config.max_message_size;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler, max_size).await {
                                    debug!("IPC connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        // Cleanup socket file
        if socket_path.exists() {
            let _ = std::fs::remove_file(socket_path);
        }

        Ok(())
    }

    /// Get a shutdown signal sender
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Initiate shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// One read from the peer
enum Frame {
    /// Clean end of stream before a length prefix
    Closed,
    /// Announced length above the limit; the body is left unread
    TooLarge(usize),
    /// Message body
    Message(Vec<u8>),
}

/// Read one length-prefixed frame
async fn read_frame(stream: &mut UnixStream, max_len: usize) -> Result<Frame, IpcError> {
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(IpcError::from(e)),
    }

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > max_len {
        return Ok(Frame::TooLarge(msg_len));
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await?;
    Ok(Frame::Message(msg_buf))
}

/// Write one length-prefixed frame
async fn write_frame<T: serde::Serialize>(
    stream: &mut UnixStream,
    message: &T,
) -> Result<(), IpcError> {
    let encoded = encode_message(message).map_err(|e| IpcError::serialization(e.to_string()))?;

    stream.write_all(&encoded).await?;
    stream.flush().await?;

    Ok(())
}

/// Handle a single IPC connection
async fn handle_connection(
    mut stream: UnixStream,
    handler: Arc<IpcHandler>,
    max_message_size: usize,
) -> Result<(), IpcError> {
    debug!("New IPC connection");

    loop {
        let msg_buf = match read_frame(&mut stream, max_message_size).await? {
            Frame::Closed => {
                debug!("IPC client disconnected");
                return Ok(());
            }
            Frame::TooLarge(msg_len) => {
                warn!(
                    "IPC message too large: {} bytes (max {})",
                    msg_len, max_message_size
                );
                let response = IpcResponse::error(
                    ErrorCode::InvalidParameters,
                    format!("Message too large: {msg_len} bytes"),
                );
                write_frame(&mut stream, &response).await?;
                // the unread body would be parsed as the next frame
                return Ok(());
            }
            Frame::Message(buf) => buf,
        };

        let command: IpcCommand = match decode_message(&msg_buf) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Invalid IPC command: {}", e);
                let response = IpcResponse::error(
                    ErrorCode::InvalidCommand,
                    format!("Invalid command format: {e}"),
                );
                write_frame(&mut stream, &response).await?;
                continue;
            }
        };

        debug!("Received IPC command: {:?}", command);

        let is_shutdown = matches!(command, IpcCommand::Shutdown);
        let response = handler.handle(command).await;
        write_frame(&mut stream, &response).await?;

        if is_shutdown {
            debug!("Shutdown command received, closing connection");
            return Ok(());
        }
    }
}

/// IPC client for connecting to the server
pub struct IpcClient {
    socket_path: std::path::PathBuf,
    max_response_size: usize,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            max_response_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Accept responses up to `size` bytes (route dumps of large tables)
    #[must_use]
    pub const fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Send a command and receive a response
    pub async fn send(&self, command: IpcCommand) -> Result<IpcResponse, IpcError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::ConnectionError(e.to_string()))?;

        write_frame(&mut stream, &command).await?;

        let msg_buf = match read_frame(&mut stream, self.max_response_size).await? {
            Frame::Closed => return Err(IpcError::protocol("Connection closed before response")),
            Frame::TooLarge(msg_len) => {
                return Err(IpcError::protocol(format!(
                    "Response too large: {msg_len} bytes"
                )))
            }
            Frame::Message(buf) => buf,
        };

        decode_message(&msg_buf).map_err(|e| IpcError::protocol(e.to_string()))
    }

    /// Send a ping command
    pub async fn ping(&self) -> Result<bool, IpcError> {
        let response = self.send(IpcCommand::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Send an administrative edit given as an option line
    pub async fn admin(&self, command: AdminCommand, line: &str) -> Result<IpcResponse, IpcError> {
        self.send(IpcCommand::admin_line(command, line)).await
    }
}
