//! Shared client state for one CLI invocation.

use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use naptha_core::{ClientConfig, NodeAddress};
use naptha_hub::HubClient;
use naptha_identity::Identity;
use naptha_node::HttpNodeClient;
use naptha_runtime::{EnvironmentProxy, OrchestrationCoordinator, RunCache, RunDispatcher};
use naptha_storage::{HttpStorage, StorageClient};
use tracing::info;

pub struct AppContext {
    pub config: ClientConfig,
    pub identity: Arc<Identity>,
    pub node_client: Arc<HttpNodeClient>,
    pub dispatcher: Arc<RunDispatcher>,
    pub environments: Arc<EnvironmentProxy>,
    pub run_cache: RunCache,
}

impl AppContext {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let identity = match &config.private_key {
            Some(key) => Identity::from_hex(key).context("PRIVATE_KEY is not a valid signing key")?,
            None => Identity::load_or_create(&config.data_paths.identity_key)?,
        };
        info!("Using identity {}", identity.public_key_hex());
        let identity = Arc::new(identity);

        let node_client = Arc::new(HttpNodeClient::new(config.request_timeout())?);
        let dispatcher = Arc::new(RunDispatcher::new(
            node_client.clone(),
            identity.clone(),
            config.retry.clone(),
        ));
        let environments = Arc::new(EnvironmentProxy::new(dispatcher.clone()));
        let run_cache = RunCache::load(&config.data_paths.run_cache);

        Ok(Self {
            config,
            identity,
            node_client,
            dispatcher,
            environments,
            run_cache,
        })
    }

    pub fn coordinator(&self) -> OrchestrationCoordinator {
        OrchestrationCoordinator::new(self.dispatcher.clone(), self.environments.clone())
    }

    pub fn storage(&self, node: &NodeAddress) -> anyhow::Result<StorageClient> {
        let backend = HttpStorage::new(node.clone(), self.config.request_timeout())?;
        Ok(StorageClient::new(Arc::new(backend)).with_retry(self.config.retry.storage.clone()))
    }

    /// Hub client without credentials.
    pub fn hub(&self) -> anyhow::Result<HubClient> {
        let url = self
            .config
            .hub_url
            .as_deref()
            .ok_or_else(|| anyhow!("HUB_URL is not set"))?;
        Ok(HubClient::new(url, self.config.request_timeout())?)
    }

    /// Hub client signed in with HUB_USER / HUB_PASS.
    pub async fn hub_signed_in(&self) -> anyhow::Result<HubClient> {
        let hub = self.hub()?;
        let (user, pass) = self.hub_credentials()?;
        hub.signin(user, pass).await?;
        Ok(hub)
    }

    pub fn hub_credentials(&self) -> anyhow::Result<(&str, &str)> {
        match (&self.config.hub_username, &self.config.hub_password) {
            (Some(user), Some(pass)) => Ok((user.as_str(), pass.as_str())),
            _ => Err(anyhow!("HUB_USER and HUB_PASS must be set")),
        }
    }

    /// Register the local identity with `node` unless it already is.
    pub async fn ensure_user(&self, node: &NodeAddress) -> anyhow::Result<()> {
        let user = self
            .node_client
            .ensure_user(node, &self.identity.public_key_hex())
            .await
            .with_context(|| format!("registering user with {}", node))?;
        info!("User {} on {}", user.id.as_deref().unwrap_or("(unnamed)"), node);
        Ok(())
    }

    /// Persist the run cache, including every record the dispatcher holds.
    pub fn save_runs(&self) -> anyhow::Result<()> {
        for record in self.dispatcher.records() {
            self.run_cache.record(&record);
        }
        self.run_cache.save()?;
        Ok(())
    }
}
