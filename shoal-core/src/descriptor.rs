//! Content descriptors: the portable metadata unit for one shared file.
//!
//! A descriptor records the chunk layout of a file, per-chunk and
//! whole-file SHA-256 digests, and the current seeder set. It persists
//! as pretty-printed JSON under a `.torrent` file name derived from the
//! content's display name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

/// Fixed chunk size for the whole system (256 KiB).
pub const CHUNK_SIZE: usize = 1 << 18;

/// Substring reserved for chunk file names; rejected in uploaded file names.
pub const RESERVED_CHUNK_MARKER: &str = "_chunk_";

/// Errors raised while reading, writing, or validating descriptors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor violates invariant: {reason}")]
    Invalid { reason: String },

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Peer-local lifecycle state of one piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TorrentStatus {
    #[default]
    Downloading,
    Downloaded,
    Seeding,
    Paused,
}

impl std::fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TorrentStatus::Downloading => write!(f, "Downloading"),
            TorrentStatus::Downloaded => write!(f, "Downloaded"),
            TorrentStatus::Seeding => write!(f, "Seeding"),
            TorrentStatus::Paused => write!(f, "Paused"),
        }
    }
}

/// Self-describing metadata for one shared file.
///
/// Field order here is the persisted key order. The parser accepts any
/// ordering; `chunk_checksums` keys serialize as decimal strings, which
/// keeps descriptor files byte-compatible with existing swarms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    /// Whole-file SHA-256, lowercase hex.
    pub checksum: String,
    /// Chunk index (0-based) to SHA-256 hex digest.
    pub chunk_checksums: BTreeMap<u32, String>,
    /// Seeder endpoints, de-duplicated; order carries no meaning.
    pub peers: Vec<String>,
    pub artist_name: String,
    /// RFC 3339 creation timestamp, assigned by the index.
    pub created_at: String,
    pub duration: u32,
    #[serde(default)]
    pub status: TorrentStatus,
}

impl ContentDescriptor {
    /// Number of chunks this descriptor covers.
    pub fn num_chunks(&self) -> u32 {
        self.chunk_checksums.len() as u32
    }

    /// File name of the persisted descriptor: `strip_ext(file_name) + ".torrent"`.
    pub fn descriptor_file_name(&self) -> String {
        descriptor_file_name(&self.file_name)
    }

    /// Checks the structural invariants every descriptor must uphold.
    ///
    /// # Errors
    /// - `DescriptorError::Invalid` - chunk count, digest shape, or peer
    ///   set violates an invariant
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let expected = expected_chunks(self.file_size, self.chunk_size);
        if self.chunk_checksums.len() as u64 != expected {
            return Err(DescriptorError::Invalid {
                reason: format!(
                    "{} chunk digests for a {} byte file ({} expected)",
                    self.chunk_checksums.len(),
                    self.file_size,
                    expected
                ),
            });
        }

        for (position, (index, digest)) in self.chunk_checksums.iter().enumerate() {
            if *index != position as u32 {
                return Err(DescriptorError::Invalid {
                    reason: format!("chunk indices must be contiguous from 0, found {index}"),
                });
            }
            if !is_hex_digest(digest) {
                return Err(DescriptorError::Invalid {
                    reason: format!("chunk {index} digest is not 64 lowercase hex chars"),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer) {
                return Err(DescriptorError::Invalid {
                    reason: format!("duplicate seeder endpoint {peer}"),
                });
            }
        }

        Ok(())
    }

    /// Renders the descriptor as pretty-printed JSON (two-space indent).
    ///
    /// # Errors
    /// - `DescriptorError::Json` - serialization failed
    pub fn to_pretty_json(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads and parses a descriptor file.
    ///
    /// # Errors
    /// - `DescriptorError::Io` - file unreadable
    /// - `DescriptorError::Json` - malformed descriptor
    pub async fn load(path: &Path) -> Result<Self, DescriptorError> {
        let data = fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persists the descriptor atomically: write a `.tmp` sibling, then rename.
    ///
    /// The rename is the synchronisation point for the seeder set; readers
    /// never observe a half-written descriptor.
    ///
    /// # Errors
    /// - `DescriptorError::Io` - write or rename failed
    /// - `DescriptorError::Json` - serialization failed
    pub async fn persist(&self, path: &Path) -> Result<(), DescriptorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = temp_sibling(path);
        fs::write(&tmp, self.to_pretty_json()?).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Chunk count implied by a file size: `ceil(file_size / chunk_size)`.
pub fn expected_chunks(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Name of chunk `index` of `file_name`: `<file_name>_chunk_<index>`.
pub fn chunk_name(file_name: &str, index: u32) -> String {
    format!("{file_name}{RESERVED_CHUNK_MARKER}{index}")
}

/// Recovers the file name from a chunk name, if it carries the marker.
pub fn file_name_of_chunk(chunk_name: &str) -> Option<&str> {
    chunk_name.split_once(RESERVED_CHUNK_MARKER).map(|(name, _)| name)
}

/// Descriptor file name for a content name: extension swapped for `.torrent`.
pub fn descriptor_file_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{stem}.torrent")
}

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn is_hex_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Incremental SHA-256 used for the whole-file digest during streamed ingestion.
#[derive(Default)]
pub struct StreamingDigest {
    hasher: Sha256,
}

impl StreamingDigest {
    /// Creates an empty digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the digest and returns lowercase hex.
    pub fn finalize_hex(self) -> String {
        to_hex(&self.hasher.finalize())
    }
}
