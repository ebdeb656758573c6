//! Capability traits for the RPC surfaces, plus their HTTP clients.
//!
//! The download engine, upload driver, and index never talk to a
//! concrete transport; they hold these traits. Production wires in the
//! reqwest-backed clients below, tests wire in in-memory fakes.

pub mod http_index;
pub mod http_peer;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use http_index::HttpIndexClient;
pub use http_peer::{HttpPeerClient, HttpPeerConnector};

use crate::peer::TransferError;
use crate::protocol::framing::UploadFrame;
use crate::protocol::{ChunkReply, DescriptorResponse, GenResponse, SearchHit, UploadResponse};

/// Everything a peer can ask of the index.
#[async_trait]
pub trait IndexApi: Send + Sync {
    /// Streams an upload; the first frame must carry the descriptor seed.
    async fn upload(
        &self,
        frames: BoxStream<'static, UploadFrame>,
    ) -> Result<UploadResponse, TransferError>;

    /// Fetches the raw descriptor for a file name.
    async fn descriptor(&self, file_name: &str) -> Result<DescriptorResponse, TransferError>;

    /// Fuzzy search over file and artist names.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, TransferError>;

    /// Adds `endpoint` to the seeder set of `file_name`.
    async fn enable_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError>;

    /// Removes `endpoint` from the seeder set of `file_name`.
    async fn stop_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError>;

    /// Volunteers `endpoint` for the contributor pool.
    async fn register_contributor(&self, endpoint: &str) -> Result<GenResponse, TransferError>;
}

/// Everything the index or another peer can ask of a peer.
#[async_trait]
pub trait PeerApi: Send + Sync {
    /// Fetches one chunk by name.
    async fn request_chunk(&self, chunk_name: &str) -> Result<ChunkReply, TransferError>;

    /// Liveness probe.
    async fn health_check(&self) -> Result<bool, TransferError>;

    /// Instructs the peer to start downloading `file_name`.
    async fn download_this(&self, file_name: &str) -> Result<GenResponse, TransferError>;
}

/// Dials a peer endpoint and returns a handle to it.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Opens a handle to `endpoint` (`host:port`).
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn PeerApi>, TransferError>;
}
