//! Shoal Core - centrally-indexed peer-to-peer file distribution
//!
//! This crate provides the building blocks of a tracker-style swarm:
//! content descriptors with per-chunk digests, the index (swarm
//! directory, streamed ingestion, contributor pool), and the peer
//! engine (chunk store, upload driver, and the parallel resumable
//! downloader).

#![warn(missing_docs)]
#![warn(clippy::too_many_lines)]

pub mod config;
pub mod descriptor;
pub mod index;
pub mod peer;
pub mod protocol;
pub mod ring;
pub mod rpc;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::ShoalConfig;
pub use descriptor::{CHUNK_SIZE, ContentDescriptor, DescriptorError, TorrentStatus};
pub use index::SwarmIndex;
pub use peer::{PeerContext, StorageLayout, TransferError};
pub use ring::HashRing;
pub use tracing_setup::{CliLogLevel, init_tracing};

/// Core errors that can bubble up from any Shoal subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    /// Descriptor parsing, validation, or persistence failures
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Upload/download engine and RPC client failures
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Standard I/O errors from filesystem operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Human-readable description of the configuration error
        reason: String,
    },
}

/// Convenience Result type using ShoalError as the error type.
pub type Result<T> = std::result::Result<T, ShoalError>;
