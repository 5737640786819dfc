//! Node protocol wire types.

use chrono::{DateTime, Utc};
use naptha_core::{ModuleRef, Params, Result, RunStatus};
use naptha_identity::Identity;
use serde::{Deserialize, Serialize};

/// Body of `POST /run/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub module: ModuleRef,
    pub params: Params,
    /// Requester user id, `user:<public key>`.
    pub consumer_id: String,
    /// Requester public key (hex).
    pub public_key: String,
    /// Hex Ed25519 signature over [`SubmitRequest::signing_payload`].
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// The fields covered by the requester signature, in a fixed order.
#[derive(Serialize)]
struct SigningPayload<'a> {
    module: &'a ModuleRef,
    params: &'a Params,
    consumer_id: &'a str,
    public_key: &'a str,
    created_at: &'a DateTime<Utc>,
}

impl SubmitRequest {
    /// Build a request signed by `identity`.
    pub fn signed(
        module: ModuleRef,
        params: Params,
        created_at: DateTime<Utc>,
        identity: &Identity,
    ) -> Result<Self> {
        let public_key = identity.public_key_hex();
        let mut req = Self {
            module,
            params,
            consumer_id: user_id(&public_key),
            public_key,
            signature: String::new(),
            created_at,
        };
        req.signature = identity.sign(&req.signing_payload()?);
        Ok(req)
    }

    /// Canonical bytes the signature covers. Params are key-ordered.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let payload = SigningPayload {
            module: &self.module,
            params: &self.params,
            consumer_id: &self.consumer_id,
            public_key: &self.public_key,
            created_at: &self.created_at,
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> Result<()> {
        naptha_identity::verify(&self.public_key, &self.signing_payload()?, &self.signature)
    }
}

/// User id a node assigns to a public key.
pub fn user_id(public_key: &str) -> String {
    format!("user:{}", public_key)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub run_id: String,
}

/// Body of `POST /run/check` and `POST /run/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRef {
    pub run_id: String,
}

/// Status string reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRunStatus {
    #[serde(alias = "submitted", alias = "queued")]
    Pending,
    #[serde(alias = "processing")]
    Running,
    Completed,
    #[serde(alias = "failed")]
    Error,
}

impl NodeRunStatus {
    pub fn to_run_status(self) -> RunStatus {
        match self {
            Self::Pending => RunStatus::Submitted,
            Self::Running => RunStatus::Running,
            Self::Completed => RunStatus::Completed,
            Self::Error => RunStatus::Failed,
        }
    }
}

/// Response of `POST /run/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub run_id: String,
    pub status: NodeRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "error_message")]
    pub error: Option<String>,
}

/// Body of `POST /user/check` and `POST /user/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(default)]
    pub is_registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub public_key: String,
}
