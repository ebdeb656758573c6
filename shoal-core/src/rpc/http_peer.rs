//! HTTP client for the peer RPC surface, plus the connector the
//! download workers and the index use to dial endpoints.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NetworkConfig;
use crate::peer::TransferError;
use crate::protocol::{
    ChunkReply, DownloadRequest, GenResponse, HealthResponse, STATUS_NOT_FOUND, STATUS_OK,
};
use crate::rpc::{PeerApi, PeerConnector};

/// Peer client over plain HTTP.
///
/// Chunk bodies ride as raw bytes; the HTTP status carries the
/// found/not-found distinction.
pub struct HttpPeerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeerClient {
    /// Creates a client for a bare `host:port` endpoint.
    pub fn new(endpoint: &str, config: &NetworkConfig) -> Self {
        Self {
            base_url: format!("http://{endpoint}"),
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent)
                .build()
                .expect("HTTP client creation should not fail"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl PeerApi for HttpPeerClient {
    async fn request_chunk(&self, chunk_name: &str) -> Result<ChunkReply, TransferError> {
        let response = self
            .client
            .get(self.url("/api/chunk"))
            .query(&[("name", chunk_name)])
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            STATUS_OK => Ok(ChunkReply::found(response.bytes().await?)),
            STATUS_NOT_FOUND => Ok(ChunkReply::not_found()),
            other => Ok(ChunkReply {
                status: other,
                data: bytes::Bytes::new(),
            }),
        }
    }

    async fn health_check(&self) -> Result<bool, TransferError> {
        let response = self.client.get(self.url("/api/health")).send().await?;
        Ok(response.json::<HealthResponse>().await?.alive)
    }

    async fn download_this(&self, file_name: &str) -> Result<GenResponse, TransferError> {
        let response = self
            .client
            .post(self.url("/api/download"))
            .json(&DownloadRequest {
                file_name: file_name.to_string(),
            })
            .send()
            .await?;
        Ok(response.json::<GenResponse>().await?)
    }
}

/// Connector producing one short-lived HTTP client per dial, matching
/// the connect-request-close discipline of the download workers.
pub struct HttpPeerConnector {
    config: NetworkConfig,
}

impl HttpPeerConnector {
    /// Creates a connector with the given network settings.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl PeerConnector for HttpPeerConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn PeerApi>, TransferError> {
        Ok(Arc::new(HttpPeerClient::new(endpoint, &self.config)))
    }
}
