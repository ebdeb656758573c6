//! End-to-end swarm tests over real HTTP: an index and several peers on
//! ephemeral ports, exercising upload, download, search, liveness, and
//! contributor pre-seeding.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shoal_core::config::ShoalConfig;
use shoal_core::descriptor::CHUNK_SIZE;
use shoal_core::peer::{fetch_and_download, upload_file};
use shoal_core::protocol::{STATUS_ALREADY_KNOWN, STATUS_NOT_FOUND, STATUS_OK};
use shoal_core::rpc::{HttpIndexClient, HttpPeerClient, HttpPeerConnector, IndexApi, PeerApi};
use shoal_core::{ContentDescriptor, PeerContext, StorageLayout, SwarmIndex};
use shoal_node::{index_router, peer_router};
use tempfile::TempDir;

async fn spawn_index(dir: &Path, config: &ShoalConfig) -> (Arc<SwarmIndex>, String) {
    let connector = Arc::new(HttpPeerConnector::new(&config.network));
    let index = Arc::new(SwarmIndex::new(
        dir.join("index-torrents"),
        connector,
        config.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let router = index_router(index.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (index, addr)
}

async fn spawn_peer(dir: &Path, index_addr: &str, config: &ShoalConfig) -> (Arc<PeerContext>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let layout = StorageLayout::rooted(&dir.join(address.replace(':', "_")));
    layout.ensure().await.unwrap();

    let ctx = Arc::new(PeerContext::new(
        address.clone(),
        layout,
        Arc::new(HttpIndexClient::for_endpoint(index_addr, &config.network)),
        Arc::new(HttpPeerConnector::new(&config.network)),
        config.clone(),
    ));

    let router = peer_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (ctx, address)
}

async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upload_then_download_round_trips_over_http() {
    let dir = TempDir::new().unwrap();
    let config = ShoalConfig::for_testing();
    let (index, index_addr) = spawn_index(dir.path(), &config).await;

    let (peer_a, addr_a) = spawn_peer(dir.path(), &index_addr, &config).await;
    let (peer_b, addr_b) = spawn_peer(dir.path(), &index_addr, &config).await;

    // Two full chunks plus a short tail.
    let payload: Vec<u8> = (0..2 * CHUNK_SIZE + 500).map(|i| (i % 239) as u8).collect();
    let source = dir.path().join("big.bin");
    tokio::fs::write(&source, &payload).await.unwrap();

    let descriptor = upload_file(&peer_a, &source).await.unwrap();
    assert_eq!(descriptor.num_chunks(), 3);
    assert_eq!(descriptor.peers, vec![addr_a.clone()]);

    fetch_and_download(peer_b.clone(), "big.bin").await.unwrap();

    let downloaded = tokio::fs::read(peer_b.layout().download_path("big.bin")).await.unwrap();
    assert_eq!(downloaded, payload);

    // Peer B is now in the swarm and serves chunks itself.
    let response = index.descriptor_response("big.bin").await;
    let current: ContentDescriptor = serde_json::from_str(&response.content).unwrap();
    assert!(current.peers.contains(&addr_b));

    let client = HttpPeerClient::new(&addr_b, &config.network);
    let reply = client.request_chunk("big.bin_chunk_0").await.unwrap();
    assert_eq!(reply.status, STATUS_OK);
    assert!(!reply.data.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_and_health_work_over_http() {
    let dir = TempDir::new().unwrap();
    let config = ShoalConfig::for_testing();
    let (_index, index_addr) = spawn_index(dir.path(), &config).await;
    let (peer_a, addr_a) = spawn_peer(dir.path(), &index_addr, &config).await;

    let source = dir.path().join("Mantra.mp3");
    tokio::fs::write(&source, b"a small song").await.unwrap();
    upload_file(&peer_a, &source).await.unwrap();

    let client = HttpIndexClient::for_endpoint(&index_addr, &config.network);
    let hits = client.search("mntr").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_name, "Mantra.mp3");
    assert_eq!(hits[0].peer_addresses, vec![addr_a.clone()]);

    assert!(client.search("no-such-song-xyz").await.unwrap().is_empty());

    let peer_client = HttpPeerClient::new(&addr_a, &config.network);
    assert!(peer_client.health_check().await.unwrap());

    let missing = peer_client.request_chunk("ghost_chunk_0").await.unwrap();
    assert_eq!(missing.status, STATUS_NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contributors_pre_seed_new_uploads() {
    let dir = TempDir::new().unwrap();
    let config = ShoalConfig::for_testing();
    let (index, index_addr) = spawn_index(dir.path(), &config).await;

    let (peer_a, _addr_a) = spawn_peer(dir.path(), &index_addr, &config).await;
    let (peer_c, addr_c) = spawn_peer(dir.path(), &index_addr, &config).await;

    let client = HttpIndexClient::for_endpoint(&index_addr, &config.network);
    assert_eq!(
        client.register_contributor(&addr_c).await.unwrap().status,
        STATUS_OK
    );
    assert_eq!(
        client.register_contributor(&addr_c).await.unwrap().status,
        STATUS_ALREADY_KNOWN
    );

    let payload: Vec<u8> = (0..CHUNK_SIZE + 77).map(|i| (i % 13) as u8).collect();
    let source = dir.path().join("fresh.bin");
    tokio::fs::write(&source, &payload).await.unwrap();
    upload_file(&peer_a, &source).await.unwrap();

    // The contributor is instructed asynchronously and downloads in the
    // background; wait for its assembled copy.
    let target = peer_c.layout().download_path("fresh.bin");
    let arrived = wait_for(
        || {
            let target = target.clone();
            async move { target.exists() }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(arrived, "contributor never pre-seeded the upload");

    let copied = tokio::fs::read(&target).await.unwrap();
    assert_eq!(copied, payload);

    let seeded = wait_for(
        || {
            let index = index.clone();
            let addr_c = addr_c.clone();
            async move {
                let response = index.descriptor_response("fresh.bin").await;
                serde_json::from_str::<ContentDescriptor>(&response.content)
                    .map(|d| d.peers.contains(&addr_c))
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(seeded, "contributor never registered as a seeder");
}
