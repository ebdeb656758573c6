//! In-memory swarm fixtures shared by the engine tests.
//!
//! `MemoryPeer`/`MemoryNetwork` stand in for remote peers, and
//! `InProcessIndex` adapts a real `SwarmIndex` to the `IndexApi` seam,
//! so uploads, directory state, and downloads exercise the production
//! code paths without sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tempfile::TempDir;

use crate::config::ShoalConfig;
use crate::descriptor::{CHUNK_SIZE, ContentDescriptor, TorrentStatus, chunk_name, sha256_hex};
use crate::index::SwarmIndex;
use crate::peer::events::recording::RecordingEventSink;
use crate::peer::{PeerContext, StorageLayout, TransferError};
use crate::protocol::framing::UploadFrame;
use crate::protocol::{
    ChunkReply, DescriptorResponse, GenResponse, STATUS_OK, SearchHit, UploadResponse,
};
use crate::rpc::{IndexApi, PeerApi, PeerConnector};

/// Fake remote peer serving chunks from memory.
#[derive(Default)]
pub(crate) struct MemoryPeer {
    alive: AtomicBool,
    fail_requests: AtomicBool,
    delay: Mutex<Duration>,
    chunks: Mutex<HashMap<String, Bytes>>,
    chunk_hits: AtomicUsize,
    downloads: Mutex<Vec<String>>,
}

impl MemoryPeer {
    pub fn put_chunk(&self, chunk_name: &str, data: &[u8]) {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.insert(chunk_name.to_string(), Bytes::copy_from_slice(data));
        }
    }

    /// Number of `request_chunk` calls that reached this peer.
    pub fn chunk_hits(&self) -> usize {
        self.chunk_hits.load(Ordering::SeqCst)
    }

    pub fn download_requests(&self) -> Vec<String> {
        self.downloads.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Makes every subsequent chunk request fail.
    pub fn fail_all_requests(&self) {
        self.fail_requests.store(true, Ordering::SeqCst);
    }

    /// Adds artificial latency to each chunk request.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }
}

#[async_trait]
impl PeerApi for MemoryPeer {
    async fn request_chunk(&self, chunk_name: &str) -> Result<ChunkReply, TransferError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransferError::Unreachable {
                endpoint: "memory-peer".to_string(),
            });
        }

        let delay = self.delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.chunk_hits.fetch_add(1, Ordering::SeqCst);
        let chunk = self.chunks.lock().ok().and_then(|c| c.get(chunk_name).cloned());
        Ok(match chunk {
            Some(data) => ChunkReply::found(data),
            None => ChunkReply::not_found(),
        })
    }

    async fn health_check(&self) -> Result<bool, TransferError> {
        Ok(self.alive.load(Ordering::SeqCst))
    }

    async fn download_this(&self, file_name: &str) -> Result<GenResponse, TransferError> {
        if let Ok(mut downloads) = self.downloads.lock() {
            downloads.push(file_name.to_string());
        }
        Ok(GenResponse { status: STATUS_OK })
    }
}

/// Fake network: endpoint string -> in-memory peer.
#[derive(Default)]
pub(crate) struct MemoryNetwork {
    peers: Mutex<HashMap<String, Arc<MemoryPeer>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, endpoint: &str) -> Arc<MemoryPeer> {
        let peer = Arc::new(MemoryPeer::default());
        peer.alive.store(true, Ordering::SeqCst);
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(endpoint.to_string(), peer.clone());
        }
        peer
    }

    /// Makes the endpoint undialable.
    pub fn kill_peer(&self, endpoint: &str) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(endpoint);
        }
    }
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn PeerApi>, TransferError> {
        let peer = self.peers.lock().ok().and_then(|p| p.get(endpoint).cloned());
        match peer {
            Some(peer) => Ok(peer),
            None => Err(TransferError::Unreachable {
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

/// Adapts a real `SwarmIndex` to the `IndexApi` capability.
pub(crate) struct InProcessIndex {
    pub index: Arc<SwarmIndex>,
}

#[async_trait]
impl IndexApi for InProcessIndex {
    async fn upload(
        &self,
        frames: BoxStream<'static, UploadFrame>,
    ) -> Result<UploadResponse, TransferError> {
        Ok(self.index.ingest_upload(frames.map(Ok)).await)
    }

    async fn descriptor(&self, file_name: &str) -> Result<DescriptorResponse, TransferError> {
        Ok(self.index.descriptor_response(file_name).await)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, TransferError> {
        Ok(self.index.search(query).await)
    }

    async fn enable_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError> {
        Ok(self.index.enable_seeding(file_name, endpoint).await)
    }

    async fn stop_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError> {
        Ok(self.index.stop_seeding(file_name, endpoint).await)
    }

    async fn register_contributor(&self, endpoint: &str) -> Result<GenResponse, TransferError> {
        Ok(self.index.register_contributor(endpoint).await)
    }
}

/// An in-memory swarm: one real index plus a fake peer network.
pub(crate) struct TestSwarm {
    pub network: Arc<MemoryNetwork>,
    pub index: Arc<SwarmIndex>,
    pub dir: TempDir,
}

impl TestSwarm {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let network = Arc::new(MemoryNetwork::new());
        let index = Arc::new(SwarmIndex::new(
            dir.path().join("index-torrents"),
            network.clone(),
            ShoalConfig::for_testing(),
        ));
        Self { network, index, dir }
    }

    /// Builds a peer context rooted inside the swarm's tempdir.
    pub fn peer_context(&self, address: &str) -> Arc<PeerContext> {
        let root = self.dir.path().join(address.replace(':', "_"));
        Arc::new(PeerContext::new(
            address,
            StorageLayout::rooted(&root),
            Arc::new(InProcessIndex {
                index: self.index.clone(),
            }),
            self.network.clone(),
            ShoalConfig::for_testing(),
        ))
    }

    /// Same as [`peer_context`], with a recording event sink attached.
    pub fn recording_peer_context(
        &self,
        address: &str,
    ) -> (Arc<PeerContext>, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::default());
        let root = self.dir.path().join(address.replace(':', "_"));
        let ctx = PeerContext::new(
            address,
            StorageLayout::rooted(&root),
            Arc::new(InProcessIndex {
                index: self.index.clone(),
            }),
            self.network.clone(),
            ShoalConfig::for_testing(),
        )
        .with_events(events.clone());
        (Arc::new(ctx), events)
    }
}

/// Hand-built descriptor over explicit chunk payloads; `file_size`
/// follows the chunk-count arithmetic the index uses.
pub(crate) fn descriptor_for(
    file_name: &str,
    chunks: &[&[u8]],
    peers: &[&str],
) -> ContentDescriptor {
    let mut whole = Vec::new();
    let mut chunk_checksums = std::collections::BTreeMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        whole.extend_from_slice(chunk);
        chunk_checksums.insert(i as u32, sha256_hex(chunk));
    }

    ContentDescriptor {
        file_name: file_name.to_string(),
        file_size: chunks.len() as u64 * CHUNK_SIZE as u64,
        chunk_size: CHUNK_SIZE as u64,
        checksum: sha256_hex(&whole),
        chunk_checksums,
        peers: peers.iter().map(|p| p.to_string()).collect(),
        artist_name: "Test Artist".to_string(),
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
        duration: 60,
        status: TorrentStatus::Downloading,
    }
}

/// Loads a fake seeder with every chunk of `descriptor`'s file.
pub(crate) fn seed_peer_with(peer: &MemoryPeer, file_name: &str, chunks: &[&[u8]]) {
    for (i, chunk) in chunks.iter().enumerate() {
        peer.put_chunk(&chunk_name(file_name, i as u32), chunk);
    }
}

/// Bare context over a throwaway swarm, for status-map style tests.
pub(crate) async fn noop_context() -> (Arc<PeerContext>, TestSwarm) {
    let swarm = TestSwarm::new();
    let ctx = swarm.peer_context("127.0.0.1:7999");
    ctx.layout().ensure().await.expect("layout");
    (ctx, swarm)
}

/// Like [`noop_context`], with a recording event sink.
pub(crate) async fn recording_context() -> (Arc<PeerContext>, Arc<RecordingEventSink>, TestSwarm) {
    let swarm = TestSwarm::new();
    let (ctx, events) = swarm.recording_peer_context("127.0.0.1:7999");
    ctx.layout().ensure().await.expect("layout");
    (ctx, events, swarm)
}
