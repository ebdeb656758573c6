//! Parallel, resumable chunk downloader.
//!
//! A download runs a fixed pool of workers over a shared bounded task
//! queue plus one in-order assembler. Chunks are assigned to seeders by
//! consistent hashing; a failed seeder is removed from the ring and the
//! chunk re-hashed onto the survivors. Verified chunks land in the cache
//! directory (making the download resumable), flow through the shared
//! `chunk_data` map, and are streamed to a `.crdownload` file in strict
//! index order. Both the task queue and the ready channel are sized to
//! the chunk count, so retries and out-of-order re-inserts can never
//! deadlock.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, watch};

use crate::descriptor::{ContentDescriptor, TorrentStatus, chunk_name, sha256_hex};
use crate::peer::{PeerContext, TransferError, store};
use crate::protocol::STATUS_OK;
use crate::ring::HashRing;

/// One unit of work: a chunk and the seeder currently assigned to it.
#[derive(Debug, Clone)]
struct DownloadTask {
    chunk_id: u32,
    chunk_name: String,
    assignee: String,
    checksum: String,
}

/// State shared between the workers and the assembler of one download.
struct ChunkCoordinator {
    /// Completed chunk bytes, keyed by chunk index.
    chunk_data: Mutex<HashMap<u32, Bytes>>,
    /// Signals completed chunk indices to the assembler.
    ready_tx: mpsc::Sender<u32>,
    /// Seeder ring for this download; shrinks on failures.
    ring: std::sync::Mutex<HashRing>,
    /// Set once the ring empties with chunks still outstanding.
    exhausted: AtomicBool,
}

impl ChunkCoordinator {
    fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::Release);
    }

    fn ring(&self) -> std::sync::MutexGuard<'_, HashRing> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum AssemblyOutcome {
    Completed(PathBuf),
    Paused,
}

/// Retrieves the descriptor for `file_name` from the index, persists it
/// into the local torrents directory, and parses it.
///
/// # Errors
/// - `TransferError::DescriptorUnavailable` - index answered non-200
/// - `TransferError::Io` / `Descriptor` - persisting or parsing failed
pub async fn fetch_descriptor(
    ctx: &Arc<PeerContext>,
    file_name: &str,
) -> Result<ContentDescriptor, TransferError> {
    let response = ctx.index().descriptor(file_name).await?;
    if response.status != STATUS_OK {
        return Err(TransferError::DescriptorUnavailable {
            file_name: file_name.to_string(),
            status: response.status,
        });
    }

    fs::create_dir_all(&ctx.layout().torrents_dir).await?;
    let path = ctx.layout().torrents_dir.join(&response.filename);
    fs::write(&path, response.content.as_bytes()).await?;
    tracing::info!("retrieved descriptor {}", response.filename);

    Ok(ContentDescriptor::load(&path).await?)
}

/// True when the assembled file already exists locally and verifies
/// against the descriptor's whole-file digest.
pub async fn is_existing(ctx: &PeerContext, descriptor: &ContentDescriptor) -> bool {
    let path = ctx.layout().download_path(&descriptor.file_name);
    store::verify_file_checksum(&path, &descriptor.checksum).await
}

/// Full download entry point: fetch the descriptor, short-circuit when a
/// verified copy already exists, otherwise run the parallel download.
///
/// # Errors
/// - everything [`start_download`] and [`fetch_descriptor`] raise
pub async fn fetch_and_download(
    ctx: Arc<PeerContext>,
    file_name: &str,
) -> Result<(), TransferError> {
    let descriptor = fetch_descriptor(&ctx, file_name).await?;
    ctx.emit_descriptor_event("download-queue", &descriptor);

    if is_existing(&ctx, &descriptor).await {
        tracing::info!("{file_name} already present and verified");
        ctx.emit_download_status(file_name, descriptor.status);
        return Ok(());
    }

    start_download(ctx, descriptor).await
}

/// Runs one parallel download to completion: resume scan, worker pool,
/// in-order assembly, whole-file verification, and promotion to seeder.
///
/// # Errors
/// - `TransferError::SwarmExhausted` - every seeder failed before the
///   download finished
/// - `TransferError::FileDigestMismatch` - assembled file is corrupt
/// - `TransferError::Io` - output files could not be created
pub async fn start_download(
    ctx: Arc<PeerContext>,
    descriptor: ContentDescriptor,
) -> Result<(), TransferError> {
    descriptor.validate()?;
    ctx.layout().ensure().await?;

    let file_name = descriptor.file_name.clone();
    let total = descriptor.num_chunks();
    let capacity = total.max(1) as usize;

    let (task_tx, task_rx) = mpsc::channel::<DownloadTask>(capacity);
    let (ready_tx, mut ready_rx) = mpsc::channel::<u32>(capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ring = HashRing::new();
    for peer in &descriptor.peers {
        if peer != ctx.address() {
            ring.add(peer);
        }
    }

    let coordinator = Arc::new(ChunkCoordinator {
        chunk_data: Mutex::new(HashMap::new()),
        ready_tx,
        ring: std::sync::Mutex::new(ring),
        exhausted: AtomicBool::new(false),
    });

    ctx.emit_download_status(&file_name, TorrentStatus::Downloading);
    ctx.update_status(&file_name, TorrentStatus::Downloading).await;

    restore_cached_chunks(&ctx, &descriptor, &coordinator).await;

    let task_rx = Arc::new(Mutex::new(task_rx));
    let mut workers = Vec::new();
    for worker_id in 0..ctx.config().swarm.worker_count {
        workers.push(tokio::spawn(download_worker(
            worker_id,
            ctx.clone(),
            coordinator.clone(),
            task_rx.clone(),
            task_tx.clone(),
            shutdown_rx.clone(),
            file_name.clone(),
        )));
    }

    seed_tasks(&descriptor, &coordinator, &task_tx).await;

    let outcome = assemble_file(&ctx, &descriptor, &coordinator, &mut ready_rx).await;

    // Wind the pool down whatever happened; workers observe the signal
    // at the top of their next iteration.
    let _ = shutdown_tx.send(true);
    drop(task_tx);
    for worker in workers {
        let _ = worker.await;
    }

    let assembled = match outcome? {
        AssemblyOutcome::Paused => {
            tracing::info!("download of {file_name} paused");
            return Ok(());
        }
        AssemblyOutcome::Completed(path) => path,
    };

    let digest = store::file_sha256(&assembled).await?;
    if digest != descriptor.checksum {
        let _ = fs::remove_file(&assembled).await;
        return Err(TransferError::FileDigestMismatch { file_name });
    }

    let moved = store::move_chunks_to_store(
        &ctx.layout().cache_dir,
        &ctx.layout().chunks_dir,
        &file_name,
    )
    .await?;
    tracing::info!("download of {file_name} complete, {moved} chunks now servable");

    ctx.emit_download_status(&file_name, TorrentStatus::Downloaded);
    ctx.update_status(&file_name, TorrentStatus::Downloaded).await;

    match ctx.index().enable_seeding(&file_name, ctx.address()).await {
        Ok(response) if response.status == STATUS_OK => {
            ctx.emit_download_status(&file_name, TorrentStatus::Seeding);
            ctx.update_status(&file_name, TorrentStatus::Seeding).await;
        }
        Ok(response) => {
            tracing::warn!(
                "index declined seeder registration for {file_name} (status {})",
                response.status
            );
        }
        Err(err) => {
            tracing::warn!("seeder registration for {file_name} failed: {err}");
        }
    }

    Ok(())
}

/// Loads cache entries that verify against their expected digest into
/// the coordinator; corrupt or missing entries are simply re-downloaded.
async fn restore_cached_chunks(
    ctx: &PeerContext,
    descriptor: &ContentDescriptor,
    coordinator: &ChunkCoordinator,
) {
    for (chunk_id, expected) in &descriptor.chunk_checksums {
        let name = chunk_name(&descriptor.file_name, *chunk_id);
        let Ok(data) = fs::read(ctx.layout().cache_chunk_path(&name)).await else {
            continue;
        };
        if sha256_hex(&data) != *expected {
            tracing::warn!("cached chunk {name} failed verification, re-downloading");
            continue;
        }

        coordinator.chunk_data.lock().await.insert(*chunk_id, Bytes::from(data));
        let _ = coordinator.ready_tx.send(*chunk_id).await;
        tracing::debug!("restored chunk {chunk_id} of {} from cache", descriptor.file_name);
    }
}

/// Enqueues one task per chunk not satisfied by the resume scan, each
/// assigned by a ring lookup on its chunk name.
async fn seed_tasks(
    descriptor: &ContentDescriptor,
    coordinator: &ChunkCoordinator,
    task_tx: &mpsc::Sender<DownloadTask>,
) {
    let restored: HashSet<u32> = coordinator.chunk_data.lock().await.keys().copied().collect();

    for chunk_id in 0..descriptor.num_chunks() {
        if restored.contains(&chunk_id) {
            continue;
        }

        let name = chunk_name(&descriptor.file_name, chunk_id);
        let assignee = coordinator.ring().get(&name).map(str::to_string);
        let Some(assignee) = assignee else {
            tracing::error!("no seeders available for {name}");
            coordinator.mark_exhausted();
            break;
        };

        let task = DownloadTask {
            chunk_id,
            chunk_name: name,
            assignee,
            checksum: descriptor.chunk_checksums[&chunk_id].clone(),
        };
        if task_tx.send(task).await.is_err() {
            break;
        }
    }
}

/// Worker loop: take a task, honor pause, fetch and verify the chunk,
/// cache it, and signal the assembler. Failures rotate the ring and
/// re-enqueue the task.
async fn download_worker(
    worker_id: usize,
    ctx: Arc<PeerContext>,
    coordinator: Arc<ChunkCoordinator>,
    queue: Arc<Mutex<mpsc::Receiver<DownloadTask>>>,
    retry_tx: mpsc::Sender<DownloadTask>,
    mut shutdown: watch::Receiver<bool>,
    file_name: String,
) {
    loop {
        let task = {
            let mut queue = queue.lock().await;
            tokio::select! {
                task = queue.recv() => task,
                _ = shutdown.changed() => None,
            }
        };
        let Some(task) = task else { break };

        if ctx.status_of(&file_name) == Some(TorrentStatus::Paused) {
            tracing::debug!("worker {worker_id} observed pause, stopping");
            break;
        }

        match fetch_chunk(&ctx, &task).await {
            Ok(data) => {
                let cache_path = ctx.layout().cache_chunk_path(&task.chunk_name);
                if let Err(err) = fs::write(&cache_path, &data).await {
                    tracing::warn!("worker {worker_id} failed to cache {}: {err}", task.chunk_name);
                }

                coordinator.chunk_data.lock().await.insert(task.chunk_id, data);
                let _ = coordinator.ready_tx.send(task.chunk_id).await;
                tracing::debug!("worker {worker_id} completed {}", task.chunk_name);
            }
            Err(err) => {
                tracing::warn!(
                    "worker {worker_id} failed {} via {}: {err}",
                    task.chunk_name,
                    task.assignee
                );
                reassign(task, &coordinator, &retry_tx).await;
            }
        }
    }
}

/// Dials the assigned seeder, fetches the chunk, and verifies its digest.
async fn fetch_chunk(ctx: &PeerContext, task: &DownloadTask) -> Result<Bytes, TransferError> {
    let peer = ctx.connector().connect(&task.assignee).await?;
    let reply = peer.request_chunk(&task.chunk_name).await?;

    if reply.status != STATUS_OK {
        return Err(TransferError::ChunkRejected {
            chunk_name: task.chunk_name.clone(),
            status: reply.status,
        });
    }
    if sha256_hex(&reply.data) != task.checksum {
        return Err(TransferError::ChunkDigestMismatch {
            chunk_name: task.chunk_name.clone(),
        });
    }

    Ok(reply.data)
}

/// Drops the failed seeder from the ring and re-enqueues the task on its
/// replacement; an empty ring marks the download exhausted.
async fn reassign(
    task: DownloadTask,
    coordinator: &ChunkCoordinator,
    retry_tx: &mpsc::Sender<DownloadTask>,
) {
    let replacement = {
        let mut ring = coordinator.ring();
        ring.remove(&task.assignee);
        ring.get(&task.chunk_name).map(str::to_string)
    };

    match replacement {
        Some(assignee) => {
            tracing::debug!("reassigning {} to {assignee}", task.chunk_name);
            let _ = retry_tx
                .send(DownloadTask {
                    assignee,
                    ..task
                })
                .await;
        }
        None => {
            tracing::error!("no seeders remain for {}", task.chunk_name);
            coordinator.mark_exhausted();
        }
    }
}

/// Streams completed chunks to `<file>.crdownload` in strict index
/// order, then renames it into place.
async fn assemble_file(
    ctx: &PeerContext,
    descriptor: &ContentDescriptor,
    coordinator: &ChunkCoordinator,
    ready_rx: &mut mpsc::Receiver<u32>,
) -> Result<AssemblyOutcome, TransferError> {
    let partial = ctx.layout().partial_download_path(&descriptor.file_name);
    let final_path = ctx.layout().download_path(&descriptor.file_name);
    let mut out = fs::File::create(&partial).await?;

    let total = descriptor.num_chunks();
    let mut next_chunk = 0u32;

    while next_chunk < total {
        if coordinator.is_exhausted() {
            drop(out);
            let _ = fs::remove_file(&partial).await;
            return Err(TransferError::SwarmExhausted {
                chunk_name: chunk_name(&descriptor.file_name, next_chunk),
            });
        }

        if ctx.status_of(&descriptor.file_name) == Some(TorrentStatus::Paused) {
            // Partial file and cache entries stay behind for a resume.
            out.flush().await?;
            return Ok(AssemblyOutcome::Paused);
        }

        match tokio::time::timeout(ctx.config().swarm.assembler_poll, ready_rx.recv()).await {
            Ok(Some(ready_id)) if ready_id == next_chunk => {
                let data = coordinator.chunk_data.lock().await.get(&ready_id).cloned();
                match data {
                    Some(data) => {
                        out.write_all(&data).await?;
                        next_chunk += 1;
                    }
                    None => tracing::warn!("chunk {ready_id} signalled but missing from map"),
                }
            }
            Ok(Some(ready_id)) => {
                // Out-of-order arrival; capacity guarantees room.
                let _ = coordinator.ready_tx.send(ready_id).await;
            }
            Ok(None) => {
                // The coordinator holds a sender, so this means the
                // download was torn down underneath us.
                drop(out);
                let _ = fs::remove_file(&partial).await;
                return Err(TransferError::SwarmExhausted {
                    chunk_name: chunk_name(&descriptor.file_name, next_chunk),
                });
            }
            Err(_) => {} // next chunk still in flight
        }
    }

    out.flush().await?;
    drop(out);
    fs::rename(&partial, &final_path).await?;
    tracing::info!("assembled {}", descriptor.file_name);

    Ok(AssemblyOutcome::Completed(final_path))
}
