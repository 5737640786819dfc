//! HTTP implementation of the node protocol.

use std::time::Duration;

use async_trait::async_trait;
use naptha_core::{Error, NodeAddress, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::transport::NodeTransport;
use crate::types::*;

const SUBMIT_PATH: &str = "/run/submit";

/// Talks JSON over HTTP to worker nodes.
#[derive(Clone)]
pub struct HttpNodeClient {
    client: Client,
}

impl HttpNodeClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        node: &NodeAddress,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = node.endpoint(path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;
        let response = check_response(node, path, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::transport(node.as_str(), format!("invalid response body from {}: {}", path, e)))
    }

    /// Ask the node whether this public key is registered.
    pub async fn check_user(&self, node: &NodeAddress, public_key: &str) -> Result<UserResponse> {
        self.post_json(
            node,
            "/user/check",
            &UserRequest {
                public_key: public_key.to_string(),
            },
        )
        .await
    }

    pub async fn register_user(&self, node: &NodeAddress, public_key: &str) -> Result<UserResponse> {
        self.post_json(
            node,
            "/user/register",
            &UserRequest {
                public_key: public_key.to_string(),
            },
        )
        .await
    }

    /// Register the key with the node unless it already is.
    pub async fn ensure_user(&self, node: &NodeAddress, public_key: &str) -> Result<UserResponse> {
        let user = self.check_user(node, public_key).await?;
        if user.is_registered {
            return Ok(user);
        }
        tracing::info!("Registering user {} with {}", public_key, node);
        self.register_user(node, public_key).await
    }
}

#[async_trait]
impl NodeTransport for HttpNodeClient {
    async fn submit(&self, node: &NodeAddress, request: &SubmitRequest) -> Result<SubmitResponse> {
        self.post_json(node, SUBMIT_PATH, request).await
    }

    async fn check(&self, node: &NodeAddress, run_id: &str) -> Result<CheckResponse> {
        self.post_json(
            node,
            "/run/check",
            &RunRef {
                run_id: run_id.to_string(),
            },
        )
        .await
    }

    async fn cancel(&self, node: &NodeAddress, run_id: &str) -> Result<()> {
        let url = node.endpoint("/run/cancel");
        let response = self
            .client
            .post(&url)
            .json(&RunRef {
                run_id: run_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;
        check_response(node, "/run/cancel", response).await?;
        Ok(())
    }
}

fn transport_error(node: &NodeAddress, e: reqwest::Error) -> Error {
    let message = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    Error::transport(node.as_str(), message)
}

/// Map HTTP status codes onto the error taxonomy.
pub(crate) async fn check_response(node: &NodeAddress, path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("{} rejected by {}: {}", path, node, body))
        }
        StatusCode::NOT_FOUND => {
            let what = if body.is_empty() {
                format!("{} on {}", path, node)
            } else {
                body
            };
            // Only a submit names a module; elsewhere the run or user is unknown.
            if path == SUBMIT_PATH {
                Error::ModuleNotFound(what)
            } else {
                Error::NotFound(what)
            }
        }
        StatusCode::CONFLICT => Error::EnvironmentConflict(body),
        _ => Error::transport(node.as_str(), format!("{} returned {}: {}", path, status, body)),
    })
}
