//! Peer-side engine: chunk store, upload driver, and the parallel
//! resumable downloader.

pub mod download;
pub mod events;
pub mod store;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

pub use download::{fetch_and_download, start_download};
pub use events::{EventSink, LogEventSink};
pub use store::StorageLayout;
pub use upload::{MediaProbe, MediaProber, NullMediaProber, upload_file};

use crate::config::ShoalConfig;
use crate::descriptor::{ContentDescriptor, DescriptorError, TorrentStatus};
use crate::rpc::{IndexApi, PeerConnector};

/// Errors raised by uploads, downloads, and the RPC clients behind them.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to reach {endpoint}")]
    Unreachable { endpoint: String },

    #[error("chunk {chunk_name} rejected with status {status}")]
    ChunkRejected { chunk_name: String, status: u16 },

    #[error("chunk {chunk_name} digest mismatch")]
    ChunkDigestMismatch { chunk_name: String },

    #[error("no seeders remain for {chunk_name}")]
    SwarmExhausted { chunk_name: String },

    #[error("assembled file {file_name} failed checksum verification")]
    FileDigestMismatch { file_name: String },

    #[error("descriptor for {file_name} unavailable (status {status})")]
    DescriptorUnavailable { file_name: String, status: u16 },

    #[error("upload rejected (status {status}): {message}")]
    UploadRejected { status: u16, message: String },

    #[error("no chunk files found for {file_name}")]
    NoChunks { file_name: String },

    #[error("descriptor error")]
    Descriptor(#[from] DescriptorError),

    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// `download-status` event payload.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatusEvent {
    pub filename: String,
    pub status: TorrentStatus,
}

/// A locally known torrent with its verification state.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub descriptor: ContentDescriptor,
    pub progress: u8,
    pub status: TorrentStatus,
}

/// Per-peer context: identity, directory layout, capability handles, and
/// the in-memory torrent status map.
///
/// The status map is the source the download workers poll for pause; it
/// mirrors into the on-disk descriptor on every transition.
pub struct PeerContext {
    address: String,
    layout: StorageLayout,
    index: Arc<dyn IndexApi>,
    connector: Arc<dyn PeerConnector>,
    events: Arc<dyn EventSink>,
    prober: Arc<dyn MediaProber>,
    status: Mutex<HashMap<String, TorrentStatus>>,
    config: ShoalConfig,
}

impl PeerContext {
    /// Creates a peer context with the default event sink and prober.
    pub fn new(
        address: impl Into<String>,
        layout: StorageLayout,
        index: Arc<dyn IndexApi>,
        connector: Arc<dyn PeerConnector>,
        config: ShoalConfig,
    ) -> Self {
        Self {
            address: address.into(),
            layout,
            index,
            connector,
            events: Arc::new(LogEventSink),
            prober: Arc::new(NullMediaProber),
            status: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Replaces the event sink (the host shell's capability).
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the media prober.
    pub fn with_prober(mut self, prober: Arc<dyn MediaProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Endpoint other peers dial to reach this one.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Directory layout for this peer instance.
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Index handle.
    pub fn index(&self) -> &Arc<dyn IndexApi> {
        &self.index
    }

    /// Peer dialer.
    pub fn connector(&self) -> &Arc<dyn PeerConnector> {
        &self.connector
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ShoalConfig {
        &self.config
    }

    /// Media metadata prober.
    pub fn prober(&self) -> &Arc<dyn MediaProber> {
        &self.prober
    }

    /// Current in-memory status of a torrent, if tracked.
    pub fn status_of(&self, file_name: &str) -> Option<TorrentStatus> {
        self.status
            .lock()
            .ok()
            .and_then(|map| map.get(file_name).copied())
    }

    /// Updates the in-memory status and mirrors it into the on-disk
    /// descriptor when one exists.
    pub async fn update_status(&self, file_name: &str, status: TorrentStatus) {
        if let Ok(mut map) = self.status.lock() {
            map.insert(file_name.to_string(), status);
        }

        let path = self.layout.descriptor_path(file_name);
        match ContentDescriptor::load(&path).await {
            Ok(mut descriptor) => {
                descriptor.status = status;
                if let Err(err) = descriptor.persist(&path).await {
                    tracing::warn!("failed to persist status for {file_name}: {err}");
                }
            }
            Err(err) => {
                tracing::debug!("no local descriptor to update for {file_name}: {err}");
            }
        }
    }

    /// Marks a download paused; running workers observe this at the top
    /// of their next iteration, the assembler on its next poll tick.
    pub async fn pause_download(&self, file_name: &str) {
        self.update_status(file_name, TorrentStatus::Paused).await;
        self.emit_download_status(file_name, TorrentStatus::Paused);
    }

    /// Emits a `download-status` event to the host shell.
    pub fn emit_download_status(&self, file_name: &str, status: TorrentStatus) {
        let payload = DownloadStatusEvent {
            filename: file_name.to_string(),
            status,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => self.events.emit("download-status", value),
            Err(err) => tracing::warn!("failed to encode download-status event: {err}"),
        }
    }

    /// Emits an event whose payload is a full descriptor.
    pub fn emit_descriptor_event(&self, event: &str, descriptor: &ContentDescriptor) {
        match serde_json::to_value(descriptor) {
            Ok(value) => self.events.emit(event, value),
            Err(err) => tracing::warn!("failed to encode {event} event: {err}"),
        }
    }

    /// Scans the torrents directory and reports each local torrent with
    /// its verification state.
    pub async fn local_torrents(&self) -> Result<Vec<TorrentInfo>, TransferError> {
        let mut torrents = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.layout.torrents_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(torrents),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("torrent") {
                continue;
            }
            let Ok(descriptor) = ContentDescriptor::load(&path).await else {
                continue;
            };

            let assembled = self.layout.download_path(&descriptor.file_name);
            let verified =
                store::verify_file_checksum(&assembled, &descriptor.checksum).await;

            let status = if verified {
                TorrentStatus::Seeding
            } else {
                self.status_of(&descriptor.file_name)
                    .unwrap_or(descriptor.status)
            };

            torrents.push(TorrentInfo {
                descriptor,
                progress: if verified { 100 } else { 0 },
                status,
            });
        }

        Ok(torrents)
    }

    /// Registers this peer as a seeder for `file_name` and emits the
    /// matching status event.
    pub async fn enable_seeding(&self, file_name: &str) -> Result<(), TransferError> {
        self.index.enable_seeding(file_name, &self.address).await?;
        self.update_status(file_name, TorrentStatus::Seeding).await;
        self.emit_download_status(file_name, TorrentStatus::Seeding);
        Ok(())
    }

    /// Withdraws this peer from the seeder set of `file_name`.
    pub async fn stop_seeding(&self, file_name: &str) -> Result<(), TransferError> {
        self.index.stop_seeding(file_name, &self.address).await?;
        self.update_status(file_name, TorrentStatus::Downloaded).await;
        self.emit_download_status(file_name, TorrentStatus::Downloaded);
        Ok(())
    }
}
