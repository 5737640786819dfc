//! HTTP client for the Hub registry.

use std::time::Duration;

use naptha_core::{Error, ModuleType, Result};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::types::{HubSession, ModuleRecord};

pub struct HubClient {
    base_url: String,
    client: Client,
    session: RwLock<Option<HubSession>>,
}

impl HubClient {
    pub fn new(base_url: impl AsRef<str>, request_timeout: Duration) -> Result<Self> {
        let base_url = base_url.as_ref().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!("HUB_URL must be an http(s) URL: {:?}", base_url)));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url,
            client,
            session: RwLock::new(None),
        })
    }

    /// Signed-in user id, if any.
    pub fn user_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.user_id.clone())
    }

    pub async fn signin(&self, username: &str, password: &str) -> Result<HubSession> {
        let request = self
            .client
            .post(self.url("/auth/signin"))
            .json(&json!({ "username": username, "password": password }));
        let session: HubSession = self.send_json(request).await?;
        info!("Signed in to hub as {}", session.user_id);
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn signup(&self, username: &str, password: &str, public_key: &str) -> Result<HubSession> {
        let request = self.client.post(self.url("/auth/signup")).json(&json!({
            "username": username,
            "password": password,
            "public_key": public_key,
        }));
        let session: HubSession = self.send_json(request).await?;
        info!("Signed up to hub as {}", session.user_id);
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn list_modules(&self, module_type: ModuleType) -> Result<Vec<ModuleRecord>> {
        let request = self
            .authorized(self.client.get(self.url("/modules")))
            .query(&[("type", module_type.as_str())]);
        self.send_json(request).await
    }

    /// Look up one module by name.
    pub async fn get_module(&self, module_type: ModuleType, name: &str) -> Result<ModuleRecord> {
        self.list_modules(module_type)
            .await?
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::ModuleNotFound(format!("{}:{}", module_type, name)))
    }

    pub async fn create_module(&self, record: &ModuleRecord) -> Result<ModuleRecord> {
        self.require_session()?;
        let request = self.authorized(self.client.post(self.url("/modules"))).json(record);
        let created = self.send_json(request).await?;
        info!("Created module {}", record.id);
        Ok(created)
    }

    pub async fn delete_module(&self, module_type: ModuleType, name: &str) -> Result<()> {
        self.require_session()?;
        let url = self.url(&format!("/modules/{}/{}", module_type, name));
        let request = self.authorized(self.client.delete(url));
        self.send(request).await?;
        info!("Deleted module {}:{}", module_type, name);
        Ok(())
    }

    /// Registered nodes. Node records are free-form.
    pub async fn list_nodes(&self) -> Result<Vec<Map<String, Value>>> {
        let request = self.authorized(self.client.get(self.url("/nodes")));
        self.send_json(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.read().as_ref() {
            Some(session) => request.bearer_auth(&session.token),
            None => request,
        }
    }

    fn require_session(&self) -> Result<()> {
        if self.session.read().is_none() {
            return Err(Error::Auth("not signed in to the hub".into()));
        }
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(&self.base_url, e.to_string()))?;
        let status = response.status();
        debug!("Hub responded {} for {}", status, response.url());
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(body),
            StatusCode::NOT_FOUND => Error::NotFound(body),
            s if s.is_client_error() => Error::InvalidInput(format!("hub returned {}: {}", s, body)),
            s => Error::transport(&self.base_url, format!("hub returned {}: {}", s, body)),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::transport(&self.base_url, format!("invalid hub response: {}", e)))
    }
}
