//! Environment Proxy: serializes operations against a shared environment
//! module on one node.
//!
//! Every (environment, node) pair has at most one open session. Operations
//! issued through a session are applied in the order they were issued, each
//! carrying the next sequence number. A sequence number is consumed as soon
//! as the node accepts the submit, whether or not the outcome is ever seen.
//! If the node reports a sequence conflict the session is dropped; the next
//! `open` starts a fresh one.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use naptha_core::{BackoffPolicy, Error, ModuleRef, NodeAddress, Params, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatcher::RunDispatcher;

/// An operation on environment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvOperation {
    GetGlobalState,
    UpdateState { state: Value },
    AppendMessage { message: Value },
    Enqueue { item: Value },
    Dequeue,
    Reset,
    /// Any other function exposed by the environment module.
    Custom { name: String, input: Value },
}

impl EnvOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::GetGlobalState => OperationKind::GetGlobalState,
            Self::UpdateState { .. } => OperationKind::UpdateState,
            Self::AppendMessage { .. } => OperationKind::AppendMessage,
            Self::Enqueue { .. } => OperationKind::Enqueue,
            Self::Dequeue => OperationKind::Dequeue,
            Self::Reset => OperationKind::Reset,
            Self::Custom { name, .. } => OperationKind::Custom(name.clone()),
        }
    }

    /// Function name the environment module dispatches on.
    pub fn func_name(&self) -> &str {
        match self {
            Self::Custom { name, .. } => name,
            other => other.kind().builtin_name().unwrap_or_default(),
        }
    }

    pub fn func_input(&self) -> Value {
        match self {
            Self::UpdateState { state } => state.clone(),
            Self::AppendMessage { message } => message.clone(),
            Self::Enqueue { item } => item.clone(),
            Self::Custom { input, .. } => input.clone(),
            Self::GetGlobalState | Self::Dequeue | Self::Reset => Value::Null,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::GetGlobalState)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    GetGlobalState,
    UpdateState,
    AppendMessage,
    Enqueue,
    Dequeue,
    Reset,
    Custom(String),
}

impl OperationKind {
    fn builtin_name(&self) -> Option<&'static str> {
        Some(match self {
            Self::GetGlobalState => "get_global_state",
            Self::UpdateState => "update_state",
            Self::AppendMessage => "add_message",
            Self::Enqueue => "enqueue",
            Self::Dequeue => "dequeue",
            Self::Reset => "reset",
            Self::Custom(_) => return None,
        })
    }

    /// Parse a function name; unknown names become `Custom`.
    pub fn parse(name: &str) -> Self {
        match name {
            "get_global_state" => Self::GetGlobalState,
            "update_state" => Self::UpdateState,
            "add_message" | "append_message" => Self::AppendMessage,
            "enqueue" => Self::Enqueue,
            "dequeue" => Self::Dequeue,
            "reset" => Self::Reset,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => f.write_str(name),
            builtin => f.write_str(builtin.builtin_name().unwrap_or_default()),
        }
    }
}

/// Operations an environment declares it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<OperationKind>);

impl Capabilities {
    /// State reads, state updates, messages and reset.
    pub fn standard() -> Self {
        Self(
            [
                OperationKind::GetGlobalState,
                OperationKind::UpdateState,
                OperationKind::AppendMessage,
                OperationKind::Reset,
            ]
            .into_iter()
            .collect(),
        )
    }

    /// Every built-in operation.
    pub fn all() -> Self {
        Self::standard()
            .with(OperationKind::Enqueue)
            .with(OperationKind::Dequeue)
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(names.iter().map(|n| OperationKind::parse(n.as_ref())).collect())
    }

    pub fn with(mut self, kind: OperationKind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn supports(&self, kind: &OperationKind) -> bool {
        self.0.contains(kind)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::standard()
    }
}

/// One operation plus whether it may be retried after a transport failure.
#[derive(Debug, Clone)]
pub struct EnvRequest {
    pub operation: EnvOperation,
    pub idempotent: bool,
}

impl EnvRequest {
    /// Reads are idempotent by default; writes are not.
    pub fn new(operation: EnvOperation) -> Self {
        let idempotent = operation.is_read_only();
        Self {
            operation,
            idempotent,
        }
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

impl From<EnvOperation> for EnvRequest {
    fn from(operation: EnvOperation) -> Self {
        Self::new(operation)
    }
}

/// State as reported after a committed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub sequence: u64,
    pub state: Value,
    /// Value returned by the operation itself, e.g. a dequeued item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: u64,
    pub environment: ModuleRef,
    pub node: NodeAddress,
}

struct Session {
    id: u64,
    capabilities: Capabilities,
    /// Last committed sequence; holding the lock is holding the session's turn.
    committed: tokio::sync::Mutex<u64>,
    closed: AtomicBool,
}

type SessionKey = (String, NodeAddress);

pub struct EnvironmentProxy {
    dispatcher: Arc<RunDispatcher>,
    policy: BackoffPolicy,
    /// Retries happen per operation, where idempotency is known.
    single_shot: BackoffPolicy,
    deadline: Duration,
    sessions: DashMap<SessionKey, Arc<Session>>,
    next_session: AtomicU64,
}

impl EnvironmentProxy {
    /// Environment runs go through `dispatcher` and share its record store.
    pub fn new(dispatcher: Arc<RunDispatcher>) -> Self {
        let retry = dispatcher.retry_settings();
        Self {
            policy: retry.environment.clone(),
            single_shot: BackoffPolicy::fixed(Duration::ZERO, 1),
            deadline: retry.environment_deadline(),
            dispatcher,
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
        }
    }

    /// Open (or reuse) the session for `environment` on `node`.
    pub fn open(
        &self,
        environment: &ModuleRef,
        node: &NodeAddress,
        capabilities: Capabilities,
    ) -> SessionHandle {
        let key = (environment.qualified_name(), node.clone());
        let session = match self.sessions.entry(key) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let id = self.next_session.fetch_add(1, Ordering::SeqCst);
                info!("Opened session {} for {} on {}", id, environment, node);
                let session = Arc::new(Session {
                    id,
                    capabilities,
                    committed: tokio::sync::Mutex::new(0),
                    closed: AtomicBool::new(false),
                });
                e.insert(Arc::clone(&session));
                session
            }
        };
        SessionHandle {
            id: session.id,
            environment: environment.clone(),
            node: node.clone(),
        }
    }

    /// Close a session. Operations queued behind the current one fail with
    /// `SessionClosed`.
    pub fn close(&self, handle: &SessionHandle) {
        let key = (handle.environment.qualified_name(), handle.node.clone());
        if let Some((_, session)) = self.sessions.remove_if(&key, |_, s| s.id == handle.id) {
            session.closed.store(true, Ordering::SeqCst);
            info!("Closed session {} for {}", session.id, handle.environment);
        }
    }

    /// Last committed sequence number of an open session.
    pub async fn committed(&self, handle: &SessionHandle) -> Result<u64> {
        let session = self.session(handle)?;
        let committed = *session.committed.lock().await;
        Ok(committed)
    }

    /// Apply one operation, in issue order relative to other operations on
    /// the same session, within the default environment deadline.
    pub async fn apply(&self, handle: &SessionHandle, request: impl Into<EnvRequest>) -> Result<StateSnapshot> {
        self.apply_until(handle, request, Instant::now() + self.deadline)
            .await
    }

    /// Apply one operation. `deadline` bounds both the wait for the
    /// session's turn and the run itself.
    pub async fn apply_until(
        &self,
        handle: &SessionHandle,
        request: impl Into<EnvRequest>,
        deadline: Instant,
    ) -> Result<StateSnapshot> {
        let request = request.into();
        let session = self.session(handle)?;
        let kind = request.operation.kind();
        if !session.capabilities.supports(&kind) {
            return Err(Error::UnsupportedOperation {
                environment: handle.environment.to_string(),
                operation: kind.to_string(),
            });
        }

        let mut committed = tokio::time::timeout_at(deadline, session.committed.lock())
            .await
            .map_err(|_| {
                Error::DeadlineExceeded(format!(
                    "{} waiting for session {} on {}",
                    kind, session.id, handle.environment
                ))
            })?;

        let mut attempts = 0u32;
        loop {
            if session.closed.load(Ordering::SeqCst) {
                return Err(Error::SessionClosed(format!(
                    "session {} for {}",
                    session.id, handle.environment
                )));
            }
            attempts += 1;
            let sequence = *committed + 1;
            match self
                .attempt(handle, &request.operation, sequence, deadline, &mut *committed)
                .await
            {
                Ok(snapshot) => {
                    debug!(
                        "Committed {} #{} on {}",
                        kind, sequence, handle.environment
                    );
                    return Ok(snapshot);
                }
                Err(e @ Error::EnvironmentConflict(_)) => {
                    warn!(
                        "{} #{} on {} conflicted, dropping session {}: {}",
                        kind, sequence, handle.environment, session.id, e
                    );
                    self.drop_session(handle, &session);
                    return Err(e);
                }
                Err(e)
                    if request.idempotent
                        && e.is_retryable()
                        && self.policy.allows_retry(attempts) =>
                {
                    let delay = self.policy.delay(attempts - 1);
                    warn!(
                        "{} #{} on {} failed (attempt {}), retrying in {:?}: {}",
                        kind, sequence, handle.environment, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("{} #{} on {} failed: {}", kind, sequence, handle.environment, e);
                    return Err(e);
                }
            }
        }
    }

    /// Convenience for `GetGlobalState`.
    pub async fn read_state(&self, handle: &SessionHandle) -> Result<Value> {
        Ok(self.apply(handle, EnvOperation::GetGlobalState).await?.state)
    }

    fn session(&self, handle: &SessionHandle) -> Result<Arc<Session>> {
        let key = (handle.environment.qualified_name(), handle.node.clone());
        self.sessions
            .get(&key)
            .filter(|s| s.id == handle.id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| {
                Error::SessionClosed(format!("session {} for {}", handle.id, handle.environment))
            })
    }

    fn drop_session(&self, handle: &SessionHandle, session: &Session) {
        session.closed.store(true, Ordering::SeqCst);
        let key = (handle.environment.qualified_name(), handle.node.clone());
        self.sessions.remove_if(&key, |_, s| s.id == session.id);
    }

    /// Submit one operation at `sequence`. Once the node accepts the submit
    /// the slot is recorded in `committed`, even if polling then fails.
    async fn attempt(
        &self,
        handle: &SessionHandle,
        operation: &EnvOperation,
        sequence: u64,
        deadline: Instant,
        committed: &mut u64,
    ) -> Result<StateSnapshot> {
        let params = Params::new()
            .with("func_name", operation.func_name())
            .with("func_input_data", operation.func_input())
            .with("sequence", sequence)
            .with("session_id", handle.id);
        let id = self
            .dispatcher
            .prepare(handle.environment.clone(), params, handle.node.clone());
        if let Err(e) = self.dispatcher.dispatch_with(&id, &self.single_shot).await {
            self.dispatcher.discard(&id);
            return Err(e);
        }
        *committed = sequence;

        let outcome = self.dispatcher.poll(&id, deadline).await;
        self.dispatcher.discard(&id);
        parse_snapshot(sequence, outcome?.into_result()?)
    }
}

/// Nodes answer either `{sequence, state[, output]}` or the bare state.
fn parse_snapshot(sequence: u64, value: Value) -> Result<StateSnapshot> {
    match value {
        Value::Object(mut fields) if fields.contains_key("sequence") && fields.contains_key("state") => {
            let acked = fields.get("sequence").and_then(Value::as_u64);
            if acked != Some(sequence) {
                return Err(Error::EnvironmentConflict(format!(
                    "node acknowledged sequence {:?}, expected {}",
                    acked, sequence
                )));
            }
            Ok(StateSnapshot {
                sequence,
                state: fields.remove("state").unwrap_or(Value::Null),
                output: fields.remove("output"),
            })
        }
        state => Ok(StateSnapshot {
            sequence,
            state,
            output: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_retry, FakeNode};
    use naptha_core::{ModuleType, RetrySettings};
    use naptha_identity::Identity;
    use serde_json::json;

    fn node() -> NodeAddress {
        NodeAddress::new("http://env-node:7001").unwrap()
    }

    fn proxy_with(fake: &Arc<FakeNode>, retry: RetrySettings) -> Arc<EnvironmentProxy> {
        let dispatcher = RunDispatcher::new(fake.clone(), Arc::new(Identity::generate()), retry);
        Arc::new(EnvironmentProxy::new(Arc::new(dispatcher)))
    }

    fn proxy(fake: &Arc<FakeNode>) -> Arc<EnvironmentProxy> {
        proxy_with(fake, fast_retry())
    }

    #[tokio::test]
    async fn test_session_reused_per_environment_and_node() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let a = p.open(&env, &node(), Capabilities::standard());
        let b = p.open(&env, &node(), Capabilities::all());
        assert_eq!(a, b);

        let other = NodeAddress::new("http://env-node-2:7001").unwrap();
        let c = p.open(&env, &other, Capabilities::standard());
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_operations_update_state() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::all());

        p.apply(&h, EnvOperation::UpdateState { state: json!({"topic": "rust"}) })
            .await
            .unwrap();
        p.apply(&h, EnvOperation::AppendMessage { message: json!("hi") })
            .await
            .unwrap();
        p.apply(&h, EnvOperation::Enqueue { item: json!(1) }).await.unwrap();
        let popped = p.apply(&h, EnvOperation::Dequeue).await.unwrap();
        assert_eq!(popped.output, Some(json!(1)));

        let state = p.read_state(&h).await.unwrap();
        assert_eq!(state["topic"], "rust");
        assert_eq!(state["messages"], json!(["hi"]));
        assert_eq!(p.committed(&h).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_applies_get_contiguous_sequences() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        let n = 20u64;
        let tasks: Vec<_> = (0..n)
            .map(|i| {
                let p = p.clone();
                let h = h.clone();
                tokio::spawn(async move {
                    p.apply(&h, EnvOperation::AppendMessage { message: json!(i) })
                        .await
                        .unwrap()
                        .sequence
                })
            })
            .collect();

        let mut sequences = Vec::new();
        for t in tasks {
            sequences.push(t.await.unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=n).collect::<Vec<_>>());
        assert_eq!(
            fake.applied_sequences("chat", &node(), h.id),
            (1..=n).collect::<Vec<_>>()
        );
        assert_eq!(
            fake.environment_state("chat", &node())["messages"]
                .as_array()
                .unwrap()
                .len(),
            n as usize
        );
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_no_gap() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        p.apply(&h, EnvOperation::AppendMessage { message: json!("a") })
            .await
            .unwrap();

        // Non-idempotent write: surfaced, not retried, not committed.
        fake.fail_next_submits(1);
        let err = p
            .apply(&h, EnvOperation::AppendMessage { message: json!("b") })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(p.committed(&h).await.unwrap(), 1);

        // Idempotent read: retried transparently.
        fake.fail_next_submits(2);
        let snapshot = p.apply(&h, EnvOperation::GetGlobalState).await.unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.state["messages"], json!(["a"]));
        assert_eq!(fake.applied_sequences("chat", &node(), h.id), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_accepted_operation_consumes_slot_when_poll_times_out() {
        let fake = Arc::new(FakeNode::new());
        let mut retry = fast_retry();
        retry.environment_deadline_secs = 1;
        let p = proxy_with(&fake, retry);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        // The node applies "a" but its result never comes back.
        fake.fail_next_checks(u32::MAX);
        let err = p
            .apply(&h, EnvOperation::AppendMessage { message: json!("a") })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunTimedOut { .. }));
        assert_eq!(p.committed(&h).await.unwrap(), 1);

        fake.fail_next_checks(0);
        let b = p
            .apply(&h, EnvOperation::AppendMessage { message: json!("b") })
            .await
            .unwrap();
        assert_eq!(b.sequence, 2);
        let state = p.read_state(&h).await.unwrap();
        assert_eq!(state["messages"], json!(["a", "b"]));
        assert_eq!(fake.applied_sequences("chat", &node(), h.id), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_conflict_drops_session_and_reopen_recovers() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        // Accepted, then failed on the node without being applied: the
        // proxy's view runs one ahead of the node's.
        fake.fail_environment_runs("add_message", 1);
        p.apply(&h, EnvOperation::AppendMessage { message: json!("lost") })
            .await
            .unwrap_err();
        assert_eq!(p.committed(&h).await.unwrap(), 1);

        let err = p.apply(&h, EnvOperation::GetGlobalState).await.unwrap_err();
        assert!(matches!(err, Error::EnvironmentConflict(_)));
        let err = p.apply(&h, EnvOperation::GetGlobalState).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed(_)));

        let reopened = p.open(&env, &node(), Capabilities::standard());
        assert_ne!(reopened.id, h.id);
        let snapshot = p
            .apply(&reopened, EnvOperation::AppendMessage { message: json!("kept") })
            .await
            .unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.state["messages"], json!(["kept"]));
    }

    #[tokio::test]
    async fn test_wait_for_turn_is_bounded_by_deadline() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        // Hold the session's turn with a write whose result never arrives.
        fake.fail_next_checks(u32::MAX);
        let holder = {
            let p = p.clone();
            let h = h.clone();
            tokio::spawn(async move {
                p.apply(&h, EnvOperation::AppendMessage { message: json!("slow") })
                    .await
            })
        };
        while fake.submit_attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = p
            .apply_until(&h, EnvOperation::GetGlobalState, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(fake.submit_attempts(), 1);

        fake.fail_next_checks(0);
        assert!(holder.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_environment_runs_share_the_dispatcher_store() {
        let fake = Arc::new(FakeNode::new());
        let dispatcher = Arc::new(RunDispatcher::new(
            fake.clone(),
            Arc::new(Identity::generate()),
            fast_retry(),
        ));
        let p = EnvironmentProxy::new(dispatcher.clone());
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());

        fake.fail_next_checks(u32::MAX);
        let pending = p.apply_until(
            &h,
            EnvOperation::GetGlobalState,
            Instant::now() + Duration::from_millis(200),
        );
        let observer = async {
            while dispatcher.records().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            dispatcher.records()
        };
        let (result, seen) = tokio::join!(pending, observer);
        assert!(result.is_err());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].request.module.module_type, ModuleType::Environment);
        // Delivered or not, the sub-run is not left behind.
        assert!(dispatcher.records().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_operation_rejected_locally() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());
        let err = p.apply(&h, EnvOperation::Dequeue).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
        assert_eq!(fake.submit_attempts(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let fake = Arc::new(FakeNode::new());
        let p = proxy(&fake);
        let env = ModuleRef::environment("chat");
        let h = p.open(&env, &node(), Capabilities::standard());
        p.close(&h);
        let err = p.apply(&h, EnvOperation::GetGlobalState).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed(_)));

        let reopened = p.open(&env, &node(), Capabilities::standard());
        assert_ne!(reopened.id, h.id);
        assert_eq!(p.apply(&reopened, EnvOperation::GetGlobalState).await.unwrap().sequence, 1);
    }

    #[test]
    fn test_parse_snapshot_rejects_wrong_sequence() {
        let err = parse_snapshot(3, json!({"sequence": 2, "state": {}})).unwrap_err();
        assert!(matches!(err, Error::EnvironmentConflict(_)));
        let bare = parse_snapshot(3, json!({"x": 1})).unwrap();
        assert_eq!(bare.state, json!({"x": 1}));
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(EnvOperation::AppendMessage { message: json!(1) }.func_name(), "add_message");
        assert_eq!(OperationKind::parse("add_message"), OperationKind::AppendMessage);
        assert_eq!(
            OperationKind::parse("vote"),
            OperationKind::Custom("vote".into())
        );
        assert!(EnvRequest::new(EnvOperation::GetGlobalState).idempotent);
        assert!(!EnvRequest::new(EnvOperation::Reset).idempotent);
    }
}
