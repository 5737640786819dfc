//! Node storage endpoints over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use naptha_core::{Error, NodeAddress, Result};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::id::StorageId;

#[derive(Deserialize)]
struct WriteResponse {
    id: String,
}

/// Storage on a node: `/storage/write`, `/storage/read/{id}` and the
/// content-addressed `/storage/cas/{hex}`.
#[derive(Clone)]
pub struct HttpStorage {
    node: NodeAddress,
    client: Client,
}

impl HttpStorage {
    pub fn new(node: NodeAddress, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { node, client })
    }

    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    fn transport(&self, e: reqwest::Error) -> Error {
        Error::transport(self.node.as_str(), e.to_string())
    }

    async fn check(&self, what: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::StorageNotFound(what.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Auth(format!("storage {} rejected: {}", what, body))
            }
            _ => Error::transport(
                self.node.as_str(),
                format!("storage {} returned {}: {}", what, status, body),
            ),
        })
    }
}

#[async_trait]
impl StorageBackend for HttpStorage {
    async fn put(&self, data: Bytes) -> Result<StorageId> {
        let url = self.node.endpoint("/storage/write");
        debug!("POST {} ({} bytes)", url, data.len());
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let response = self.check("write", response).await?;
        let body: WriteResponse = response.json().await.map_err(|e| self.transport(e))?;
        StorageId::parse(&body.id)
    }

    async fn put_content(&self, digest: &str, data: Bytes) -> Result<()> {
        let url = self.node.endpoint(&format!("/storage/cas/{}", digest));
        debug!("PUT {} ({} bytes)", url, data.len());
        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(digest, response).await?;
        Ok(())
    }

    async fn contains_content(&self, digest: &str) -> Result<bool> {
        let url = self.node.endpoint(&format!("/storage/cas/{}", digest));
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        match self.check(digest, response).await {
            Ok(_) => Ok(true),
            Err(Error::StorageNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, id: &StorageId) -> Result<Bytes> {
        let url = match id.digest() {
            Some(digest) => self.node.endpoint(&format!("/storage/cas/{}", digest)),
            None => self.node.endpoint(&format!("/storage/read/{}", id)),
        };
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let response = self.check(id.as_str(), response).await?;
        response.bytes().await.map_err(|e| self.transport(e))
    }
}
