//! On-disk chunk store: directory layout, chunk splitting and merging,
//! and file digest verification.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::descriptor::{
    CHUNK_SIZE, RESERVED_CHUNK_MARKER, StreamingDigest, chunk_name, descriptor_file_name,
};
use crate::peer::TransferError;

const READ_BUFFER: usize = 64 * 1024;

/// Directory layout for one peer instance.
///
/// `downloads_<port>/` holds assembled files with `torrents/` and
/// `cache/` beneath it; `chunks/` holds the servable chunk files.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub downloads_dir: PathBuf,
    pub torrents_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub chunks_dir: PathBuf,
}

impl StorageLayout {
    /// Standard layout for a peer listening on `port`.
    pub fn for_port(base_dir: &Path, port: u16) -> Self {
        let downloads_dir = base_dir.join(format!("downloads_{port}"));
        Self {
            torrents_dir: downloads_dir.join("torrents"),
            cache_dir: downloads_dir.join("cache"),
            chunks_dir: base_dir.join("chunks"),
            downloads_dir,
        }
    }

    /// Layout rooted at an arbitrary directory (test fixtures).
    pub fn rooted(root: &Path) -> Self {
        let downloads_dir = root.join("downloads");
        Self {
            torrents_dir: downloads_dir.join("torrents"),
            cache_dir: downloads_dir.join("cache"),
            chunks_dir: root.join("chunks"),
            downloads_dir,
        }
    }

    /// Creates all directories of the layout.
    ///
    /// # Errors
    /// - `std::io::Error` - directory creation failed
    pub async fn ensure(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.downloads_dir).await?;
        fs::create_dir_all(&self.torrents_dir).await?;
        fs::create_dir_all(&self.cache_dir).await?;
        fs::create_dir_all(&self.chunks_dir).await?;
        Ok(())
    }

    /// Path of the local descriptor file for `file_name`.
    pub fn descriptor_path(&self, file_name: &str) -> PathBuf {
        self.torrents_dir.join(descriptor_file_name(file_name))
    }

    /// Path of a servable chunk.
    pub fn chunk_path(&self, chunk_name: &str) -> PathBuf {
        self.chunks_dir.join(chunk_name)
    }

    /// Path of a cached in-progress chunk.
    pub fn cache_chunk_path(&self, chunk_name: &str) -> PathBuf {
        self.cache_dir.join(chunk_name)
    }

    /// Path of the assembled file.
    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.downloads_dir.join(file_name)
    }

    /// Path of the in-flight assembly file.
    pub fn partial_download_path(&self, file_name: &str) -> PathBuf {
        self.downloads_dir.join(format!("{file_name}.crdownload"))
    }
}

/// Reads a servable chunk; `None` when the chunk file does not exist.
///
/// # Errors
/// - `std::io::Error` - any read failure other than not-found
pub async fn read_chunk(
    chunks_dir: &Path,
    chunk_name: &str,
) -> std::io::Result<Option<Bytes>> {
    match fs::read(chunks_dir.join(chunk_name)).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Splits a source file into `<file_name>_chunk_<i>` files under
/// `chunks_dir`, returning the chunk count.
///
/// # Errors
/// - `std::io::Error` - source unreadable or a chunk file unwritable
pub async fn split_into_chunks(
    source: &Path,
    chunks_dir: &Path,
    file_name: &str,
) -> std::io::Result<u32> {
    fs::create_dir_all(chunks_dir).await?;
    let mut file = fs::File::open(source).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut index = 0u32;

    loop {
        let read = read_up_to(&mut file, &mut buffer).await?;
        if read == 0 {
            break;
        }
        fs::write(chunks_dir.join(chunk_name(file_name, index)), &buffer[..read]).await?;
        index += 1;
    }

    Ok(index)
}

/// Concatenates local chunk files in index order into `dest`.
///
/// # Errors
/// - `TransferError::NoChunks` - no chunk files exist for `file_name`
/// - `TransferError::Io` - read or write failure
pub async fn merge_chunks(
    chunks_dir: &Path,
    file_name: &str,
    dest: &Path,
) -> Result<u32, TransferError> {
    let first = chunks_dir.join(chunk_name(file_name, 0));
    if !fs::try_exists(&first).await.unwrap_or(false) {
        return Err(TransferError::NoChunks {
            file_name: file_name.to_string(),
        });
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut out = fs::File::create(dest).await?;
    let mut index = 0u32;

    loop {
        let chunk_path = chunks_dir.join(chunk_name(file_name, index));
        match fs::read(&chunk_path).await {
            Ok(data) => {
                out.write_all(&data).await?;
                index += 1;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
            Err(err) => return Err(err.into()),
        }
    }

    out.flush().await?;
    Ok(index)
}

/// Merges local chunks into `dest` and verifies the whole-file digest.
///
/// # Errors
/// - `TransferError::FileDigestMismatch` - rebuilt file is corrupt
/// - plus everything `merge_chunks` raises
pub async fn rebuild_file(
    chunks_dir: &Path,
    file_name: &str,
    dest: &Path,
    expected_checksum: &str,
) -> Result<(), TransferError> {
    merge_chunks(chunks_dir, file_name, dest).await?;
    if !verify_file_checksum(dest, expected_checksum).await {
        return Err(TransferError::FileDigestMismatch {
            file_name: file_name.to_string(),
        });
    }
    Ok(())
}

/// Moves every `<file_name>_chunk_*` file from the cache into the chunk
/// store, returning how many moved.
///
/// # Errors
/// - `std::io::Error` - directory scan or rename failed
pub async fn move_chunks_to_store(
    cache_dir: &Path,
    chunks_dir: &Path,
    file_name: &str,
) -> std::io::Result<usize> {
    fs::create_dir_all(chunks_dir).await?;
    let prefix = format!("{file_name}{RESERVED_CHUNK_MARKER}");

    let mut moved = 0;
    let mut entries = fs::read_dir(cache_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) {
            fs::rename(entry.path(), chunks_dir.join(name)).await?;
            moved += 1;
        }
    }
    Ok(moved)
}

/// Streaming SHA-256 of a file, lowercase hex.
///
/// # Errors
/// - `std::io::Error` - file unreadable
pub async fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut digest = StreamingDigest::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }

    Ok(digest.finalize_hex())
}

/// True when the file exists and its SHA-256 equals `expected`.
pub async fn verify_file_checksum(path: &Path, expected: &str) -> bool {
    match file_sha256(path).await {
        Ok(digest) => digest == expected,
        Err(_) => false,
    }
}

async fn read_up_to(file: &mut fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::descriptor::sha256_hex;

    #[tokio::test]
    async fn split_then_merge_round_trips() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.bin");
        // One full chunk plus a short tail.
        let data: Vec<u8> = (0..CHUNK_SIZE + 1000).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &data).await.unwrap();

        let chunks_dir = dir.path().join("chunks");
        let count = split_into_chunks(&source, &chunks_dir, "source.bin").await.unwrap();
        assert_eq!(count, 2);
        assert!(chunks_dir.join("source.bin_chunk_0").exists());
        assert!(chunks_dir.join("source.bin_chunk_1").exists());

        let merged = dir.path().join("merged.bin");
        let merged_count = merge_chunks(&chunks_dir, "source.bin", &merged).await.unwrap();
        assert_eq!(merged_count, 2);
        assert_eq!(fs::read(&merged).await.unwrap(), data);
    }

    #[tokio::test]
    async fn merge_without_chunks_errors() {
        let dir = tempdir().unwrap();
        let result = merge_chunks(dir.path(), "ghost.mp3", &dir.path().join("out")).await;
        assert!(matches!(result, Err(TransferError::NoChunks { .. })));
    }

    #[tokio::test]
    async fn rebuild_verifies_digest() {
        let dir = tempdir().unwrap();
        let chunks_dir = dir.path().join("chunks");
        fs::create_dir_all(&chunks_dir).await.unwrap();
        fs::write(chunks_dir.join("a.mp3_chunk_0"), b"payload").await.unwrap();

        let dest = dir.path().join("a.mp3");
        rebuild_file(&chunks_dir, "a.mp3", &dest, &sha256_hex(b"payload"))
            .await
            .unwrap();

        let corrupt = rebuild_file(&chunks_dir, "a.mp3", &dest, &sha256_hex(b"other")).await;
        assert!(matches!(
            corrupt,
            Err(TransferError::FileDigestMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn move_chunks_only_touches_matching_files() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache");
        let chunks = dir.path().join("chunks");
        fs::create_dir_all(&cache).await.unwrap();
        fs::write(cache.join("song.mp3_chunk_0"), b"0").await.unwrap();
        fs::write(cache.join("song.mp3_chunk_1"), b"1").await.unwrap();
        fs::write(cache.join("other.mp3_chunk_0"), b"x").await.unwrap();

        let moved = move_chunks_to_store(&cache, &chunks, "song.mp3").await.unwrap();
        assert_eq!(moved, 2);
        assert!(chunks.join("song.mp3_chunk_1").exists());
        assert!(cache.join("other.mp3_chunk_0").exists());
    }

    #[tokio::test]
    async fn read_chunk_distinguishes_missing_from_present() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("song.mp3_chunk_0"), b"bytes").await.unwrap();

        let found = read_chunk(dir.path(), "song.mp3_chunk_0").await.unwrap();
        assert_eq!(found.unwrap().as_ref(), b"bytes");

        let missing = read_chunk(dir.path(), "song.mp3_chunk_9").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn file_digest_matches_in_memory_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.bin");
        fs::write(&path, b"digest me").await.unwrap();

        assert_eq!(file_sha256(&path).await.unwrap(), sha256_hex(b"digest me"));
        assert!(verify_file_checksum(&path, &sha256_hex(b"digest me")).await);
        assert!(!verify_file_checksum(&path, &sha256_hex(b"not me")).await);
    }
}
