//! Upload driver: streams a local file to the index and materialises
//! the local seeder state (chunk files plus an assembled copy).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::descriptor::{CHUNK_SIZE, ContentDescriptor};
use crate::peer::download::fetch_descriptor;
use crate::peer::{PeerContext, TransferError, store};
use crate::protocol::STATUS_OK;
use crate::protocol::framing::{UploadFrame, UploadMeta};

/// Artist and duration metadata extracted from a media file.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    pub artist: Option<String>,
    pub duration: Option<u32>,
}

/// External collaborator that inspects media files for tag metadata.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probes `path`; unknown fields stay `None`.
    async fn probe(&self, path: &Path) -> MediaProbe;
}

/// Prober that knows nothing; uploads fall back to
/// `"Unknown Artist"` and a zero duration.
pub struct NullMediaProber;

#[async_trait]
impl MediaProber for NullMediaProber {
    async fn probe(&self, _path: &Path) -> MediaProbe {
        MediaProbe::default()
    }
}

/// Uploads a local file: stream it to the index chunk by chunk, then
/// split it into servable chunk files, assemble the downloads copy, and
/// emit `upload-status`.
///
/// # Errors
/// - `TransferError::UploadRejected` - index answered non-200
/// - `TransferError::Io` - local file unreadable or chunk store unwritable
/// - plus everything descriptor retrieval raises
pub async fn upload_file(
    ctx: &Arc<PeerContext>,
    local_path: &Path,
) -> Result<ContentDescriptor, TransferError> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid file name: {}", local_path.display()),
            ))
        })?
        .to_string();

    let probe = ctx.prober().probe(local_path).await;
    let meta = UploadMeta {
        file_name: file_name.clone(),
        peer_address: ctx.address().to_string(),
        album_artist: probe.artist.unwrap_or_else(|| "Unknown Artist".to_string()),
        duration: probe.duration.unwrap_or(0),
    };

    let frames = file_frames(local_path, meta).await?;
    let response = ctx.index().upload(frames).await?;
    if response.status != STATUS_OK {
        return Err(TransferError::UploadRejected {
            status: response.status,
            message: response.message,
        });
    }
    tracing::info!("upload accepted: {}", response.torrent_file_name);

    ctx.layout().ensure().await?;
    store::split_into_chunks(local_path, &ctx.layout().chunks_dir, &file_name).await?;

    let descriptor = fetch_descriptor(ctx, &file_name).await?;
    store::merge_chunks(
        &ctx.layout().chunks_dir,
        &file_name,
        &ctx.layout().download_path(&file_name),
    )
    .await?;

    ctx.emit_descriptor_event("upload-status", &descriptor);
    tracing::info!("{file_name} split into local chunks and ready to seed");

    Ok(descriptor)
}

/// Reads a file in chunk-sized slices and yields upload frames, the
/// first carrying the descriptor seed metadata.
async fn file_frames(
    path: &Path,
    meta: UploadMeta,
) -> Result<BoxStream<'static, UploadFrame>, TransferError> {
    let file = fs::File::open(path).await?;

    let stream = futures::stream::unfold(
        (file, Some(meta)),
        |(mut file, mut meta)| async move {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            let mut filled = 0;
            while filled < buffer.len() {
                match file.read(&mut buffer[filled..]).await {
                    Ok(0) => break,
                    Ok(read) => filled += read,
                    Err(err) => {
                        tracing::error!("upload read failed mid-stream: {err}");
                        return None;
                    }
                }
            }
            if filled == 0 {
                return None;
            }
            buffer.truncate(filled);

            let data = Bytes::from(buffer);
            let frame = match meta.take() {
                Some(meta) => UploadFrame::opening(meta, data),
                None => UploadFrame::continuation(data),
            };
            Some((frame, (file, meta)))
        },
    );

    Ok(stream.boxed())
}
