//! Shared RPC message types and application status codes.
//!
//! Control responses carry their status inside the body, the way the
//! original wire protocol did; the HTTP layer underneath stays 200 for
//! anything that produced a response at all.

pub mod framing;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Request or operation succeeded.
pub const STATUS_OK: u16 = 200;
/// Idempotent registration: endpoint was already known.
pub const STATUS_ALREADY_KNOWN: u16 = 204;
/// First upload frame was missing required metadata.
pub const STATUS_MALFORMED_UPLOAD: u16 = 301;
/// Contributor pool is at capacity.
pub const STATUS_POOL_FULL: u16 = 400;
/// Uploaded file name contains the reserved chunk marker.
pub const STATUS_RESERVED_NAME: u16 = 401;
/// Named content or chunk is unknown.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Internal I/O failure.
pub const STATUS_INTERNAL: u16 = 500;

/// Final response to a streamed upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: u16,
    pub torrent_file_name: String,
    pub message: String,
}

/// Descriptor retrieval result; `content` is the raw descriptor JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorResponse {
    pub status: u16,
    pub filename: String,
    pub content: String,
}

/// One fuzzy-search match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_name: String,
    pub artist_name: String,
    pub peer_addresses: Vec<String>,
    pub created_at: String,
}

/// Search response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

/// Seeder join/leave request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingRequest {
    pub file_name: String,
    pub endpoint: String,
}

/// Contributor pool registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorRequest {
    pub endpoint: String,
}

/// Ask a peer to start downloading a named file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub file_name: String,
}

/// Bare status-only response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenResponse {
    pub status: u16,
}

/// Peer liveness reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthResponse {
    pub alive: bool,
}

/// Chunk fetch result: app status plus the raw chunk bytes.
#[derive(Debug, Clone)]
pub struct ChunkReply {
    pub status: u16,
    pub data: Bytes,
}

impl ChunkReply {
    /// Reply for a chunk that was found and read.
    pub fn found(data: Bytes) -> Self {
        Self {
            status: STATUS_OK,
            data,
        }
    }

    /// Empty 404 reply.
    pub fn not_found() -> Self {
        Self {
            status: STATUS_NOT_FOUND,
            data: Bytes::new(),
        }
    }
}
