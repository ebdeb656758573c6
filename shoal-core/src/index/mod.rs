//! The index: sole source of truth for content descriptors and swarm
//! membership.
//!
//! Ingests streamed uploads into descriptors, tracks seeder sets and
//! peer liveness, serves descriptor retrieval and fuzzy search, and
//! offloads pre-seeding of new content to the contributor pool via a
//! consistent-hash ring.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::config::ShoalConfig;
use crate::descriptor::{
    CHUNK_SIZE, ContentDescriptor, RESERVED_CHUNK_MARKER, StreamingDigest, TorrentStatus,
    sha256_hex,
};
use crate::protocol::framing::{FrameError, UploadFrame, UploadMeta};
use crate::protocol::{
    DescriptorResponse, GenResponse, STATUS_ALREADY_KNOWN, STATUS_INTERNAL,
    STATUS_MALFORMED_UPLOAD, STATUS_NOT_FOUND, STATUS_OK, STATUS_POOL_FULL, STATUS_RESERVED_NAME,
    SearchHit, UploadResponse,
};
use crate::ring::HashRing;
use crate::rpc::{PeerApi, PeerConnector};

/// Mutable directory state, guarded by one mutex taken only for short
/// critical sections.
#[derive(Default)]
struct Directory {
    /// file name -> persisted descriptor path
    descriptors: HashMap<String, PathBuf>,
    /// peer endpoint -> last observed liveness
    liveness: HashMap<String, bool>,
    /// contributor endpoint -> RPC handle
    contributors: HashMap<String, Arc<dyn PeerApi>>,
    contributor_ring: HashRing,
}

/// Central index for one swarm deployment.
pub struct SwarmIndex {
    torrents_dir: PathBuf,
    connector: Arc<dyn PeerConnector>,
    config: ShoalConfig,
    directory: Mutex<Directory>,
    /// Serializes descriptor read-modify-write for seeder join/leave so
    /// concurrent calls cannot lose updates.
    seeding_lock: tokio::sync::Mutex<()>,
}

impl SwarmIndex {
    /// Creates an index persisting descriptors under `torrents_dir`.
    pub fn new(
        torrents_dir: impl Into<PathBuf>,
        connector: Arc<dyn PeerConnector>,
        config: ShoalConfig,
    ) -> Self {
        Self {
            torrents_dir: torrents_dir.into(),
            connector,
            config,
            directory: Mutex::new(Directory::default()),
            seeding_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn directory(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuilds the descriptor table from descriptor files already on
    /// disk, so a restarted index keeps serving its catalogue.
    pub async fn restore(&self) -> std::io::Result<usize> {
        let mut restored = 0;
        let mut entries = match tokio::fs::read_dir(&self.torrents_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("torrent") {
                continue;
            }
            if let Ok(descriptor) = ContentDescriptor::load(&path).await {
                self.directory()
                    .descriptors
                    .insert(descriptor.file_name.clone(), path);
                restored += 1;
            }
        }

        tracing::info!("restored {restored} descriptors from {}", self.torrents_dir.display());
        Ok(restored)
    }

    /// Ingests one streamed upload and registers the resulting
    /// descriptor.
    ///
    /// The first frame must carry `file_name` and `peer_address` (301
    /// otherwise); file names containing the reserved chunk marker are
    /// rejected with 401. Chunk bytes are digested and discarded; the
    /// index never stores content.
    pub async fn ingest_upload<S>(&self, frames: S) -> UploadResponse
    where
        S: Stream<Item = Result<UploadFrame, FrameError>> + Unpin,
    {
        let mut frames = frames;

        let first = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => return upload_failure(STATUS_INTERNAL, &err.to_string()),
            None => return upload_failure(STATUS_MALFORMED_UPLOAD, "empty upload stream"),
        };

        let meta = match &first.meta {
            Some(meta) if !meta.file_name.is_empty() && !meta.peer_address.is_empty() => {
                meta.clone()
            }
            _ => {
                return upload_failure(
                    STATUS_MALFORMED_UPLOAD,
                    "first chunk must carry file_name and peer_address",
                );
            }
        };

        if meta.file_name.contains(RESERVED_CHUNK_MARKER) {
            return upload_failure(
                STATUS_RESERVED_NAME,
                &format!("file name may not contain \"{RESERVED_CHUNK_MARKER}\""),
            );
        }

        let mut whole_file = StreamingDigest::new();
        let mut chunk_checksums = BTreeMap::new();
        let mut next_chunk = 0u32;

        let mut ingest_chunk = |data: &[u8]| {
            if data.is_empty() {
                return;
            }
            whole_file.update(data);
            chunk_checksums.insert(next_chunk, sha256_hex(data));
            next_chunk += 1;
        };

        ingest_chunk(&first.data);
        drop(first);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => ingest_chunk(&frame.data),
                Err(err) => return upload_failure(STATUS_INTERNAL, &err.to_string()),
            }
        }

        let descriptor = self.finalize_descriptor(&meta, whole_file, chunk_checksums);
        let torrent_file_name = descriptor.descriptor_file_name();
        let path = self.torrents_dir.join(&torrent_file_name);

        if let Err(err) = descriptor.persist(&path).await {
            tracing::error!("failed to persist descriptor for {}: {err}", meta.file_name);
            return upload_failure(STATUS_INTERNAL, "failed to persist descriptor");
        }

        {
            let mut directory = self.directory();
            directory.descriptors.insert(meta.file_name.clone(), path);
            directory.liveness.insert(meta.peer_address.clone(), true);
        }

        tracing::info!(
            "registered {} ({} chunks) seeded by {}",
            meta.file_name,
            descriptor.num_chunks(),
            meta.peer_address
        );
        self.spawn_contributor_fanout(&descriptor);

        UploadResponse {
            status: STATUS_OK,
            torrent_file_name,
            message: format!("{} registered with the swarm", meta.file_name),
        }
    }

    fn finalize_descriptor(
        &self,
        meta: &UploadMeta,
        whole_file: StreamingDigest,
        chunk_checksums: BTreeMap<u32, String>,
    ) -> ContentDescriptor {
        let num_chunks = chunk_checksums.len() as u64;
        ContentDescriptor {
            file_name: meta.file_name.clone(),
            // Chunk-count arithmetic, not true byte count; existing
            // descriptors in the wild carry this value.
            file_size: num_chunks * CHUNK_SIZE as u64,
            chunk_size: CHUNK_SIZE as u64,
            checksum: whole_file.finalize_hex(),
            chunk_checksums,
            peers: vec![meta.peer_address.clone()],
            artist_name: meta.album_artist.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            duration: meta.duration,
            status: TorrentStatus::Seeding,
        }
    }

    /// Instructs up to R contributors, chosen by consecutive ring
    /// lookups keyed by the descriptor's creation timestamp, to download
    /// the new content. Fire-and-forget.
    fn spawn_contributor_fanout(&self, descriptor: &ContentDescriptor) {
        let targets: Vec<(String, Arc<dyn PeerApi>)> = {
            let directory = self.directory();
            let want = self
                .config
                .swarm
                .replication_factor
                .min(directory.contributors.len());
            directory
                .contributor_ring
                .get_n(&descriptor.created_at, want)
                .into_iter()
                .filter_map(|endpoint| {
                    directory
                        .contributors
                        .get(&endpoint)
                        .cloned()
                        .map(|handle| (endpoint, handle))
                })
                .collect()
        };

        for (endpoint, handle) in targets {
            let file_name = descriptor.file_name.clone();
            tokio::spawn(async move {
                match handle.download_this(&file_name).await {
                    Ok(response) if response.status == STATUS_OK => {
                        tracing::info!("contributor {endpoint} pre-seeding {file_name}");
                    }
                    Ok(response) => {
                        tracing::warn!(
                            "contributor {endpoint} declined {file_name} (status {})",
                            response.status
                        );
                    }
                    Err(err) => {
                        tracing::warn!("contributor {endpoint} unreachable for {file_name}: {err}");
                    }
                }
            });
        }
    }

    /// Registers a contributor endpoint. Idempotent: duplicates return
    /// 204, a full pool returns 400.
    pub async fn register_contributor(&self, endpoint: &str) -> GenResponse {
        {
            let directory = self.directory();
            if directory.contributors.contains_key(endpoint) {
                return GenResponse {
                    status: STATUS_ALREADY_KNOWN,
                };
            }
            if directory.contributors.len() >= self.config.swarm.max_contributors {
                return GenResponse {
                    status: STATUS_POOL_FULL,
                };
            }
        }

        let handle = match self.connector.connect(endpoint).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!("could not open handle to contributor {endpoint}: {err}");
                return GenResponse {
                    status: STATUS_INTERNAL,
                };
            }
        };

        // Re-validate after the await: another registration may have
        // taken the last slot (or this endpoint) while we were dialing.
        let mut directory = self.directory();
        if directory.contributors.contains_key(endpoint) {
            return GenResponse {
                status: STATUS_ALREADY_KNOWN,
            };
        }
        if directory.contributors.len() >= self.config.swarm.max_contributors {
            return GenResponse {
                status: STATUS_POOL_FULL,
            };
        }
        directory.contributors.insert(endpoint.to_string(), handle);
        directory.contributor_ring.add(endpoint);
        directory.liveness.insert(endpoint.to_string(), true);

        tracing::info!("contributor {endpoint} joined the pool");
        GenResponse { status: STATUS_OK }
    }

    /// Adds `endpoint` to the seeder set of `file_name`.
    ///
    /// Serialized against other seeder mutations; idempotent.
    pub async fn enable_seeding(&self, file_name: &str, endpoint: &str) -> GenResponse {
        let _guard = self.seeding_lock.lock().await;

        let Some(path) = self.descriptor_path(file_name) else {
            return GenResponse {
                status: STATUS_NOT_FOUND,
            };
        };

        let mut descriptor = match ContentDescriptor::load(&path).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::error!("failed to read descriptor for {file_name}: {err}");
                return GenResponse {
                    status: STATUS_INTERNAL,
                };
            }
        };

        if !descriptor.peers.iter().any(|p| p == endpoint) {
            descriptor.peers.push(endpoint.to_string());
            if let Err(err) = descriptor.persist(&path).await {
                tracing::error!("failed to rewrite descriptor for {file_name}: {err}");
                return GenResponse {
                    status: STATUS_INTERNAL,
                };
            }
        }

        self.directory().liveness.insert(endpoint.to_string(), true);
        tracing::info!("{endpoint} now seeding {file_name}");
        GenResponse { status: STATUS_OK }
    }

    /// Removes `endpoint` from the seeder set of `file_name`.
    pub async fn stop_seeding(&self, file_name: &str, endpoint: &str) -> GenResponse {
        let _guard = self.seeding_lock.lock().await;

        let Some(path) = self.descriptor_path(file_name) else {
            return GenResponse {
                status: STATUS_NOT_FOUND,
            };
        };

        let mut descriptor = match ContentDescriptor::load(&path).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::error!("failed to read descriptor for {file_name}: {err}");
                return GenResponse {
                    status: STATUS_INTERNAL,
                };
            }
        };

        let before = descriptor.peers.len();
        descriptor.peers.retain(|p| p != endpoint);
        if descriptor.peers.len() != before
            && let Err(err) = descriptor.persist(&path).await
        {
            tracing::error!("failed to rewrite descriptor for {file_name}: {err}");
            return GenResponse {
                status: STATUS_INTERNAL,
            };
        }

        tracing::info!("{endpoint} stopped seeding {file_name}");
        GenResponse { status: STATUS_OK }
    }

    /// Returns the raw descriptor JSON for `file_name`.
    pub async fn descriptor_response(&self, file_name: &str) -> DescriptorResponse {
        let Some(path) = self.descriptor_path(file_name) else {
            return DescriptorResponse {
                status: STATUS_NOT_FOUND,
                filename: String::new(),
                content: String::new(),
            };
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => DescriptorResponse {
                status: STATUS_OK,
                filename: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
                content,
            },
            Err(err) => {
                tracing::error!("failed to read descriptor file for {file_name}: {err}");
                DescriptorResponse {
                    status: STATUS_INTERNAL,
                    filename: String::new(),
                    content: String::new(),
                }
            }
        }
    }

    /// Fuzzy discovery: scans every descriptor in the torrents directory
    /// and matches `query` independently against file and artist names.
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        let mut results = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.torrents_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("search could not scan torrents directory: {err}");
                return results;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("search scan aborted: {err}");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("torrent") {
                continue;
            }
            let Ok(descriptor) = ContentDescriptor::load(&path).await else {
                continue;
            };

            if is_fuzzy_match(query, &descriptor.file_name)
                || is_fuzzy_match(query, &descriptor.artist_name)
            {
                results.push(SearchHit {
                    file_name: descriptor.file_name,
                    artist_name: descriptor.artist_name,
                    peer_addresses: descriptor.peers,
                    created_at: descriptor.created_at,
                });
            }
        }

        results
    }

    /// Spawns the background liveness loop probing every known peer.
    pub fn spawn_liveness_monitor(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.network.health_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.probe_peers_once().await;
            }
        })
    }

    /// One pass of the liveness loop: health-check every known peer and
    /// flip its flag. Dead peers stay in the table; their seeder-set
    /// entries are left for downloaders to discover by failing.
    pub async fn probe_peers_once(&self) {
        let endpoints: Vec<String> = self.directory().liveness.keys().cloned().collect();

        for endpoint in endpoints {
            let alive = match self.connector.connect(&endpoint).await {
                Ok(peer) => peer.health_check().await.unwrap_or(false),
                Err(_) => false,
            };

            let mut directory = self.directory();
            let was_alive = directory.liveness.insert(endpoint.clone(), alive);
            if was_alive == Some(true) && !alive {
                tracing::info!("peer {endpoint} is offline");
            }
        }
    }

    /// Snapshot of the peer-liveness table.
    pub fn peer_liveness(&self) -> HashMap<String, bool> {
        self.directory().liveness.clone()
    }

    /// Number of registered contributors.
    pub fn contributor_count(&self) -> usize {
        self.directory().contributors.len()
    }

    fn descriptor_path(&self, file_name: &str) -> Option<PathBuf> {
        self.directory().descriptors.get(file_name).cloned()
    }
}

fn upload_failure(status: u16, message: &str) -> UploadResponse {
    UploadResponse {
        status,
        torrent_file_name: String::new(),
        message: message.to_string(),
    }
}

/// Case-insensitive subsequence match: every character of `query` must
/// appear in `target` in order.
fn is_fuzzy_match(query: &str, target: &str) -> bool {
    let mut target_chars = target.chars().flat_map(char::to_lowercase);
    query
        .chars()
        .flat_map(char::to_lowercase)
        .all(|q| target_chars.any(|t| t == q))
}
