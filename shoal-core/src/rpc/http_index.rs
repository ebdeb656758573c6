//! HTTP client for the index RPC surface.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::NetworkConfig;
use crate::peer::TransferError;
use crate::protocol::framing::{UploadFrame, encode_frame};
use crate::protocol::{
    DescriptorResponse, GenResponse, SearchHit, SearchResponse, SeedingRequest,
    ContributorRequest, UploadResponse,
};
use crate::rpc::IndexApi;

/// Index client over plain HTTP.
pub struct HttpIndexClient {
    base_url: String,
    client: reqwest::Client,
    search_timeout: std::time::Duration,
}

impl HttpIndexClient {
    /// Creates a client for a full base URL (`http://host:port`).
    pub fn new(base_url: impl Into<String>, config: &NetworkConfig) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .user_agent(config.user_agent)
                .build()
                .expect("HTTP client creation should not fail"),
            search_timeout: config.search_timeout,
        }
    }

    /// Creates a client for a bare `host:port` endpoint.
    pub fn for_endpoint(endpoint: &str, config: &NetworkConfig) -> Self {
        Self::new(format!("http://{endpoint}"), config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl IndexApi for HttpIndexClient {
    async fn upload(
        &self,
        frames: BoxStream<'static, UploadFrame>,
    ) -> Result<UploadResponse, TransferError> {
        let body = reqwest::Body::wrap_stream(
            frames.map(|frame| Ok::<Bytes, std::io::Error>(encode_frame(&frame))),
        );

        let response = self
            .client
            .post(self.url("/api/upload"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        Ok(response.json::<UploadResponse>().await?)
    }

    async fn descriptor(&self, file_name: &str) -> Result<DescriptorResponse, TransferError> {
        let response = self
            .client
            .get(self.url("/api/descriptor"))
            .query(&[("file_name", file_name)])
            .send()
            .await?;
        Ok(response.json::<DescriptorResponse>().await?)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, TransferError> {
        let response = self
            .client
            .get(self.url("/api/search"))
            .query(&[("query", query)])
            .timeout(self.search_timeout)
            .send()
            .await?;
        Ok(response.json::<SearchResponse>().await?.results)
    }

    async fn enable_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError> {
        let response = self
            .client
            .post(self.url("/api/seeding/enable"))
            .json(&SeedingRequest {
                file_name: file_name.to_string(),
                endpoint: endpoint.to_string(),
            })
            .send()
            .await?;
        Ok(response.json::<GenResponse>().await?)
    }

    async fn stop_seeding(
        &self,
        file_name: &str,
        endpoint: &str,
    ) -> Result<GenResponse, TransferError> {
        let response = self
            .client
            .post(self.url("/api/seeding/disable"))
            .json(&SeedingRequest {
                file_name: file_name.to_string(),
                endpoint: endpoint.to_string(),
            })
            .send()
            .await?;
        Ok(response.json::<GenResponse>().await?)
    }

    async fn register_contributor(&self, endpoint: &str) -> Result<GenResponse, TransferError> {
        let response = self
            .client
            .post(self.url("/api/contributors"))
            .json(&ContributorRequest {
                endpoint: endpoint.to_string(),
            })
            .send()
            .await?;
        Ok(response.json::<GenResponse>().await?)
    }
}
