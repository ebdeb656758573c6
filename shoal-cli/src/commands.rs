//! Command implementations behind the CLI surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shoal_core::config::ShoalConfig;
use shoal_core::peer::{PeerContext, StorageLayout, fetch_and_download, upload_file};
use shoal_core::rpc::{HttpIndexClient, HttpPeerConnector, IndexApi};
use shoal_core::{Result, SwarmIndex};

/// Runs the central index until interrupted.
pub async fn run_index(port: u16, torrents_dir: PathBuf) -> Result<()> {
    let config = ShoalConfig::from_env();
    let connector = Arc::new(HttpPeerConnector::new(&config.network));
    let index = Arc::new(SwarmIndex::new(torrents_dir, connector, config));

    index.restore().await?;
    index.clone().spawn_liveness_monitor();

    shoal_node::serve_index(index, &format!("127.0.0.1:{port}")).await?;
    Ok(())
}

/// Runs a peer node until interrupted, optionally volunteering it for
/// the contributor pool.
pub async fn run_peer(
    port: u16,
    index_endpoint: &str,
    contributor: bool,
    base_dir: PathBuf,
) -> Result<()> {
    let config = ShoalConfig::from_env();
    let (ctx, address) = peer_context(port, index_endpoint, &base_dir, config).await?;

    if contributor {
        match ctx.index().register_contributor(&address).await {
            Ok(response) => {
                tracing::info!("contributor registration answered {}", response.status);
            }
            Err(err) => tracing::warn!("contributor registration failed: {err}"),
        }
    }

    shoal_node::serve_peer(ctx, &address).await?;
    Ok(())
}

/// Uploads one local file through the given peer identity.
pub async fn run_upload(
    file: &Path,
    port: u16,
    index_endpoint: &str,
    base_dir: PathBuf,
) -> Result<()> {
    let config = ShoalConfig::from_env();
    let (ctx, _address) = peer_context(port, index_endpoint, &base_dir, config).await?;

    let descriptor = upload_file(&ctx, file).await?;
    println!(
        "Uploaded {} ({} chunks). Descriptor: {}",
        descriptor.file_name,
        descriptor.num_chunks(),
        descriptor.descriptor_file_name()
    );
    Ok(())
}

/// Downloads one file through the given peer identity.
pub async fn run_download(
    file_name: &str,
    port: u16,
    index_endpoint: &str,
    base_dir: PathBuf,
) -> Result<()> {
    let config = ShoalConfig::from_env();
    let (ctx, _address) = peer_context(port, index_endpoint, &base_dir, config).await?;

    fetch_and_download(ctx.clone(), file_name).await?;
    println!(
        "Downloaded {} to {}",
        file_name,
        ctx.layout().download_path(file_name).display()
    );
    Ok(())
}

/// Prints fuzzy search results from the index.
pub async fn run_search(query: &str, index_endpoint: &str) -> Result<()> {
    let config = ShoalConfig::from_env();
    let client = HttpIndexClient::for_endpoint(index_endpoint, &config.network);

    let hits = client.search(query).await?;
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Matching songs:");
    for hit in hits {
        println!(
            "- Title: {}\n  Artist: {}\n  Created: {}\n  Peers: {}\n",
            hit.file_name,
            hit.artist_name,
            hit.created_at,
            hit.peer_addresses.len()
        );
    }
    Ok(())
}

async fn peer_context(
    port: u16,
    index_endpoint: &str,
    base_dir: &Path,
    config: ShoalConfig,
) -> Result<(Arc<PeerContext>, String)> {
    let address = format!("127.0.0.1:{port}");
    let layout = StorageLayout::for_port(base_dir, port);
    layout.ensure().await?;

    let ctx = Arc::new(PeerContext::new(
        address.clone(),
        layout,
        Arc::new(HttpIndexClient::for_endpoint(index_endpoint, &config.network)),
        Arc::new(HttpPeerConnector::new(&config.network)),
        config,
    ));
    Ok((ctx, address))
}
