//! Publisher module for IPC communication
//!
//! Publishes offer book state to other system components.

use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::offers::OfferBookState;

/// Publisher for sending offer book snapshots via Unix socket
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // The consumer may not be listening yet
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(SyncError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            SyncError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        *self.stream.lock().await = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Publish one pair's book. Delivery failures are logged, never returned.
    pub async fn publish(&self, state: &OfferBookState) -> Result<()> {
        let message = encode_frame(state)?;

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(());
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&message).await {
                Ok(_) => {
                    debug!(
                        pair = %state.pair,
                        buy_offers = state.buy_offers.len(),
                        sell_offers = state.sell_offers.len(),
                        "Published offer book state"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None;
                }
            }
        }

        Ok(())
    }
}

/// MessagePack body behind a 4-byte big-endian length prefix
pub fn encode_frame(state: &OfferBookState) -> Result<Vec<u8>> {
    let data = rmp_serde::to_vec_named(state)
        .map_err(|e| SyncError::SerializationError(format!("Failed to serialize: {}", e)))?;

    let len = (data.len() as u32).to_be_bytes();
    let mut message = Vec::with_capacity(4 + data.len());
    message.extend_from_slice(&len);
    message.extend_from_slice(&data);
    Ok(message)
}
