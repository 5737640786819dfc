//! Transport seam between the engine and worker nodes.

use async_trait::async_trait;
use naptha_core::{NodeAddress, Result};

use crate::types::{CheckResponse, SubmitRequest, SubmitResponse};

/// Request/response contract every worker node answers.
///
/// Implementations map transport problems to `Error::Transport`, rejected
/// signatures to `Error::Auth`, unknown modules on submit to
/// `Error::ModuleNotFound`, unknown runs to `Error::NotFound` and sequencing
/// rejections to `Error::EnvironmentConflict`.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn submit(&self, node: &NodeAddress, request: &SubmitRequest) -> Result<SubmitResponse>;

    async fn check(&self, node: &NodeAddress, run_id: &str) -> Result<CheckResponse>;

    async fn cancel(&self, node: &NodeAddress, run_id: &str) -> Result<()>;
}
