//! Wire framing for the streamed upload call.
//!
//! An upload is a sequence of frames, each a length-prefixed pair:
//!
//! ```text
//! [u32 meta_len][meta JSON][u32 data_len][chunk bytes]
//! ```
//!
//! The first frame carries an [`UploadMeta`] header seeding the
//! descriptor; continuation frames use `meta_len == 0`. Frames never
//! exceed one chunk of payload, so the decoder can bound its buffering.

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::descriptor::CHUNK_SIZE;

/// Upper bound on the serialized meta header.
const MAX_META_LEN: usize = 64 * 1024;

/// Framing errors; any of these aborts the upload.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream ended inside a frame")]
    Truncated,

    #[error("meta header of {len} bytes exceeds limit")]
    OversizedMeta { len: usize },

    #[error("chunk payload of {len} bytes exceeds chunk size")]
    OversizedChunk { len: usize },

    #[error("malformed meta header")]
    Meta(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Descriptor seed fields carried by the first upload frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadMeta {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub peer_address: String,
    #[serde(default)]
    pub album_artist: String,
    #[serde(default)]
    pub duration: u32,
}

/// One upload frame: optional meta header plus one chunk of payload.
#[derive(Debug, Clone)]
pub struct UploadFrame {
    pub meta: Option<UploadMeta>,
    pub data: Bytes,
}

impl UploadFrame {
    /// First frame of an upload.
    pub fn opening(meta: UploadMeta, data: Bytes) -> Self {
        Self {
            meta: Some(meta),
            data,
        }
    }

    /// Continuation frame carrying only chunk bytes.
    pub fn continuation(data: Bytes) -> Self {
        Self { meta: None, data }
    }
}

/// Encodes a frame into its wire form.
pub fn encode_frame(frame: &UploadFrame) -> Bytes {
    let meta_bytes = frame
        .meta
        .as_ref()
        .map(|meta| serde_json::to_vec(meta).unwrap_or_default())
        .unwrap_or_default();

    let mut out = BytesMut::with_capacity(8 + meta_bytes.len() + frame.data.len());
    out.put_u32(meta_bytes.len() as u32);
    out.put_slice(&meta_bytes);
    out.put_u32(frame.data.len() as u32);
    out.put_slice(&frame.data);
    out.freeze()
}

/// Incremental frame decoder over arbitrarily split byte input.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends transport bytes to the internal buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True when no partial frame is buffered.
    pub fn is_drained(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pops the next complete frame, or `None` until more bytes arrive.
    ///
    /// # Errors
    /// - `FrameError::OversizedMeta` / `OversizedChunk` - length prefix
    ///   exceeds its bound
    /// - `FrameError::Meta` - header is not valid JSON
    pub fn next_frame(&mut self) -> Result<Option<UploadFrame>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let meta_len = read_u32(&self.buf[0..4]) as usize;
        if meta_len > MAX_META_LEN {
            return Err(FrameError::OversizedMeta { len: meta_len });
        }

        if self.buf.len() < 4 + meta_len + 4 {
            return Ok(None);
        }
        let data_len = read_u32(&self.buf[4 + meta_len..8 + meta_len]) as usize;
        if data_len > CHUNK_SIZE {
            return Err(FrameError::OversizedChunk { len: data_len });
        }

        let total = 8 + meta_len + data_len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total);
        let _ = frame.split_to(4);
        let meta_bytes = frame.split_to(meta_len);
        let meta = if meta_bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&meta_bytes)?)
        };
        let _ = frame.split_to(4);

        Ok(Some(UploadFrame {
            meta,
            data: frame.freeze(),
        }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Adapts a stream of transport byte blobs into a stream of frames.
///
/// A truncated trailing frame surfaces as `FrameError::Truncated`;
/// transport failures surface as `FrameError::Transport`.
pub fn decode_stream<S, E>(inner: S) -> impl Stream<Item = Result<UploadFrame, FrameError>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    futures::stream::unfold(
        (inner, FrameDecoder::new(), false),
        |(mut inner, mut decoder, mut ended)| async move {
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => return Some((Ok(frame), (inner, decoder, ended))),
                    Ok(None) => {}
                    Err(err) => return Some((Err(err), (inner, FrameDecoder::new(), true))),
                }

                if ended {
                    if !decoder.is_drained() {
                        return Some((
                            Err(FrameError::Truncated),
                            (inner, FrameDecoder::new(), true),
                        ));
                    }
                    return None;
                }

                match inner.next().await {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(err)) => {
                        return Some((
                            Err(FrameError::Transport(err.to_string())),
                            (inner, FrameDecoder::new(), true),
                        ));
                    }
                    None => ended = true,
                }
            }
        },
    )
}
