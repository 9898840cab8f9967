//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RpcError, RpcResult, TransportErrorKind};
use crate::transport::frame::DEFAULT_MAX_MESSAGE_SIZE;
use crate::transport::{MessageHandler, ServerTransport};

use super::connection::{handle_connection, ConnectionLimits};

/// Connection counters for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections served.
    pub connections_total: AtomicU64,
    /// Total messages received.
    pub messages_total: AtomicU64,
    /// Connections that ended with an error.
    pub connections_failed: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
}

impl ConnectionStats {
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_messages(&self) -> u64 {
        self.messages_total.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    fn record_connection(&self, messages: u64, success: bool) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.messages_total.fetch_add(messages, Ordering::Relaxed);
        if !success {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Unix socket server settings.
#[derive(Debug, Clone)]
pub struct UnixServerConfig {
    pub socket_path: PathBuf,
    /// Octal mode applied to the socket file, e.g. "0660".
    pub socket_permissions: String,
    pub max_message_size: usize,
    pub socket_timeout: Duration,
    pub max_concurrent_connections: usize,
    /// How long `stop` waits for open connections to finish.
    pub drain_timeout: Duration,
}

impl UnixServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            socket_permissions: "0660".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            socket_timeout: Duration::from_secs(30),
            max_concurrent_connections: 100,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Unix socket server.
pub struct UnixServerTransport {
    config: UnixServerConfig,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl UnixServerTransport {
    pub fn new(config: UnixServerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            stats: Arc::new(ConnectionStats::default()),
            shutdown,
            accept_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &UnixServerConfig {
        &self.config
    }

    /// Get connection counters.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Remove a stale socket file and create the parent directory.
    fn prepare_socket_path(socket_path: &Path) -> RpcResult<()> {
        // Security: Use symlink_metadata to detect symlinks without following them
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            // Refuse to remove if the path is a symlink (prevents arbitrary file deletion)
            if metadata.file_type().is_symlink() {
                return Err(transport_error(format!(
                    "Socket path {} is a symlink, refusing to remove for security",
                    socket_path.display()
                )));
            }

            std::fs::remove_file(socket_path).map_err(|e| {
                transport_error(format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                transport_error(format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }

    /// Set socket file permissions.
    fn set_socket_permissions(path: &Path, permissions_str: &str) -> RpcResult<()> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| RpcError::Config {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            transport_error(format!(
                "Failed to set socket permissions on {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Wait for all active connections to drain.
    ///
    /// Returns immediately if there are no active connections.
    pub async fn wait_for_drain(&self) {
        let poll_interval = Duration::from_millis(100);

        while self.stats.active() > 0 {
            debug!(active = self.stats.active(), "Waiting for connections to drain");
            tokio::time::sleep(poll_interval).await;
        }

        info!("All connections drained");
    }
}

#[async_trait]
impl ServerTransport for UnixServerTransport {
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> RpcResult<()> {
        if self.is_running() {
            return Err(transport_error("Server transport already started".to_string()));
        }

        let socket_path = &self.config.socket_path;
        Self::prepare_socket_path(socket_path)?;

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            transport_error(format!(
                "Failed to bind to socket {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        Self::set_socket_permissions(socket_path, &self.config.socket_permissions)?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_connections));
        info!(
            path = %socket_path.display(),
            max_connections = self.config.max_concurrent_connections,
            "Socket listener bound"
        );

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let stats = Arc::clone(&self.stats);
        let limits = ConnectionLimits {
            max_message_size: self.config.max_message_size,
            socket_timeout: self.config.socket_timeout,
        };
        let max_connections = self.config.max_concurrent_connections;
        let connection_shutdown = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let stream = match result {
                            Ok((stream, _addr)) => stream,
                            Err(e) => {
                                warn!(error = %e, "Failed to accept connection");
                                continue;
                            }
                        };

                        let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!(max = max_connections, "Connection limit reached, rejecting connection");
                                continue;
                            }
                        };

                        let handler = Arc::clone(&handler);
                        let stats = Arc::clone(&stats);
                        let shutdown = connection_shutdown.clone();

                        stats.active_connections.fetch_add(1, Ordering::Relaxed);
                        debug!(active = stats.active(), "New connection accepted");

                        tokio::spawn(async move {
                            let _permit = permit; // Released when the connection ends
                            let (messages, success) =
                                match handle_connection(stream, handler, limits, shutdown).await {
                                    Ok(messages) => (messages, true),
                                    Err(e) => {
                                        error!(error = %e, "Connection handler error");
                                        (0, false)
                                    }
                                };

                            stats.record_connection(messages, success);
                            stats.active_connections.fetch_sub(1, Ordering::Relaxed);
                            debug!(active = stats.active(), success, "Connection closed");
                        });
                    }
                    _ = shutdown.changed() => {
                        info!("Shutdown signal received, stopping listener");
                        break;
                    }
                }
            }
        });

        *self.accept_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    async fn stop(&self) -> RpcResult<()> {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(task) = task else {
            return Ok(());
        };

        self.shutdown.send_replace(true);
        if let Err(e) = task.await {
            error!(error = %e, "Accept loop ended abnormally");
        }

        let drain_timeout = self.config.drain_timeout;
        if tokio::time::timeout(drain_timeout, self.wait_for_drain())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout after {}s, some connections may be terminated",
                drain_timeout.as_secs()
            );
        }

        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            debug!(error = %e, "Socket file already gone");
        }

        info!("Socket listener stopped");
        Ok(())
    }
}

fn transport_error(message: String) -> RpcError {
    RpcError::Transport {
        kind: TransportErrorKind::Other { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"keep me").unwrap();
        let link = dir.path().join("rpc.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(UnixServerTransport::prepare_socket_path(&link).is_err());
        assert!(target.exists());
    }

    #[test]
    fn test_prepare_removes_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rpc.sock");
        UnixServerTransport::prepare_socket_path(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());

        std::fs::write(&path, b"stale").unwrap();
        UnixServerTransport::prepare_socket_path(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_bad_permissions_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            UnixServerTransport::set_socket_permissions(&path, "rw-rw----"),
            Err(RpcError::Config { .. })
        ));
    }
}
