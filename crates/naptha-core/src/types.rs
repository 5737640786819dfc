//! Module references, node addresses and the run lifecycle model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::params::Params;

/// Kind of module a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Agent,
    Orchestrator,
    Environment,
    Persona,
}

impl ModuleType {
    pub fn all() -> &'static [ModuleType] {
        &[Self::Agent, Self::Orchestrator, Self::Environment, Self::Persona]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Orchestrator => "orchestrator",
            Self::Environment => "environment",
            Self::Persona => "persona",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "orchestrator" => Ok(Self::Orchestrator),
            "environment" => Ok(Self::Environment),
            "persona" => Ok(Self::Persona),
            other => Err(Error::InvalidInput(format!("unknown module type: {}", other))),
        }
    }
}

/// Resolved reference to a module. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Module name without the type prefix.
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ModuleRef {
    pub fn new(module_type: ModuleType, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_type,
            version: None,
            url: None,
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(ModuleType::Agent, id)
    }

    pub fn environment(id: impl Into<String>) -> Self {
        Self::new(ModuleType::Environment, id)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Parse `type:name[@version]`. A bare name is an agent.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (module_type, rest) = match s.split_once(':') {
            Some((prefix, rest)) => (prefix.parse::<ModuleType>()?, rest),
            None => (ModuleType::Agent, s),
        };
        let (name, version) = match rest.split_once('@') {
            Some((name, version)) if !version.is_empty() => (name, Some(version.to_string())),
            Some((name, _)) => (name, None),
            None => (rest, None),
        };
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::InvalidInput(format!("invalid module name: {:?}", s)));
        }
        Ok(Self {
            id: name.to_string(),
            module_type,
            version,
            url: None,
        })
    }

    /// Fully qualified name, e.g. `agent:hello_world`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.module_type, self.id)
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}@{}", self.module_type, self.id, v),
            None => write!(f, "{}:{}", self.module_type, self.id),
        }
    }
}

/// Base URL of a node, normalized without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref().trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "node address must be an http(s) URL: {:?}",
                url
            )));
        }
        Ok(Self(url.to_string()))
    }

    /// Parse a comma-separated node list, as accepted on the command line.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::new)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identifier of a local run record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Submitted,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Submitted => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::TimedOut => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: RunStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The node ran the module and reported an error.
    Application,
    /// Submission never reached the node.
    Unreachable,
    Auth,
    ModuleNotFound,
    Cancelled,
    /// Deadline exceeded before a terminal status.
    Timeout,
    /// Environment read or write-back failed around the run.
    Environment,
}

impl FailureKind {
    /// Classify a library error into the failure it represents.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Transport { .. } => Self::Unreachable,
            Error::Auth(_) => Self::Auth,
            Error::ModuleNotFound(_) => Self::ModuleNotFound,
            Error::RunTimedOut { .. } | Error::DeadlineExceeded(_) => Self::Timeout,
            Error::EnvironmentConflict(_)
            | Error::UnsupportedOperation { .. }
            | Error::SessionClosed(_) => Self::Environment,
            _ => Self::Application,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth | Self::ModuleNotFound | Self::Cancelled)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Application => "application error",
            Self::Unreachable => "unreachable node",
            Self::Auth => "authentication error",
            Self::ModuleNotFound => "module not found",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timed out",
            Self::Environment => "environment error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What the caller asked to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub module: ModuleRef,
    pub params: Params,
    pub node: NodeAddress,
    /// Requester public key (hex).
    pub requester: String,
    pub created_at: DateTime<Utc>,
}

/// Local record of one submitted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub request: RunRequest,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Run id assigned by the worker node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(request: RunRequest) -> Self {
        Self {
            id: RunId::generate(),
            created_at: request.created_at,
            request,
            status: RunStatus::Created,
            result: None,
            failure: None,
            node_run_id: None,
            submitted_at: None,
            finished_at: None,
        }
    }

    pub fn node(&self) -> &NodeAddress {
        &self.request.node
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// record changed; terminal records never change.
    pub fn advance(&mut self, next: RunStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        match next {
            RunStatus::Submitted => self.submitted_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    pub fn complete(&mut self, result: serde_json::Value) -> bool {
        if self.advance(RunStatus::Completed) {
            self.result = Some(result);
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self, failure: RunFailure) -> bool {
        if self.advance(RunStatus::Failed) {
            self.failure = Some(failure);
            true
        } else {
            false
        }
    }

    pub fn time_out(&mut self) -> bool {
        if self.advance(RunStatus::TimedOut) {
            self.failure = Some(RunFailure::new(
                FailureKind::Timeout,
                "deadline exceeded before the node reported a terminal status",
            ));
            true
        } else {
            false
        }
    }
}
