//! In-process fake worker node used by the runtime tests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use naptha_core::{
    BackoffPolicy, Error, ModuleRef, ModuleType, NodeAddress, Params, Result, RetrySettings,
};
use naptha_node::{CheckResponse, NodeRunStatus, NodeTransport, SubmitRequest, SubmitResponse};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

/// Retry settings with millisecond delays so tests finish quickly.
pub(crate) fn fast_retry() -> RetrySettings {
    let tick = Duration::from_millis(5);
    RetrySettings {
        submit: BackoffPolicy::fixed(tick, 4),
        poll: BackoffPolicy::fixed(tick, u32::MAX),
        step: BackoffPolicy::fixed(tick, 3),
        environment: BackoffPolicy::fixed(tick, 3),
        timeout_retries: 1,
        run_deadline_secs: 5,
        environment_deadline_secs: 5,
        max_parallel_steps: 8,
        storage: BackoffPolicy::fixed(tick, 3),
    }
}

/// How the fake node treats runs of one module.
#[derive(Debug, Clone, Default)]
pub(crate) struct Behavior {
    pending_checks: u32,
    fail_first: u32,
    never_finish: bool,
    reject_auth: bool,
    missing: bool,
}

impl Behavior {
    /// Report `n` non-terminal checks before completing: the first one
    /// pending, the rest running.
    pub fn pending(mut self, n: u32) -> Self {
        self.pending_checks = n;
        self
    }

    /// The first `n` runs of the module end with an application error.
    pub fn fail_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn never_finish(mut self) -> Self {
        self.never_finish = true;
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn missing(mut self) -> Self {
        self.missing = true;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub node: NodeAddress,
    pub request: SubmitRequest,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub module: String,
    pub node: NodeAddress,
    pub at: Instant,
}

#[derive(Debug)]
enum Outcome {
    Complete(Value),
    Fail(String),
}

#[derive(Debug)]
struct FakeRun {
    module: ModuleRef,
    node: NodeAddress,
    checks: u32,
    outcome: Outcome,
}

#[derive(Debug, Default)]
struct EnvState {
    state: Value,
    /// Last applied sequence per session.
    sessions: HashMap<u64, u64>,
    /// (session, sequence) in application order.
    applied: Vec<(u64, u64)>,
}

#[derive(Default)]
struct Inner {
    behaviors: HashMap<String, Behavior>,
    runs: HashMap<String, FakeRun>,
    down: HashSet<NodeAddress>,
    submit_failures: u32,
    check_failures: u32,
    /// Environment function name -> submits still to reject.
    env_submit_failures: HashMap<String, u32>,
    /// Environment function name -> accepted runs still to fail unapplied.
    env_run_failures: HashMap<String, u32>,
    submit_attempts: usize,
    check_count: usize,
    per_module: HashMap<String, u32>,
    submissions: Vec<Submission>,
    completions: Vec<Completion>,
    cancelled: Vec<String>,
    environments: HashMap<(String, NodeAddress), EnvState>,
    next_id: u64,
}

#[derive(Default)]
pub(crate) struct FakeNode {
    inner: Mutex<Inner>,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, module: &str, behavior: Behavior) {
        self.inner.lock().behaviors.insert(module.to_string(), behavior);
    }

    pub fn take_down(&self, node: &NodeAddress) {
        self.inner.lock().down.insert(node.clone());
    }

    pub fn fail_next_submits(&self, n: u32) {
        self.inner.lock().submit_failures = n;
    }

    pub fn fail_next_checks(&self, n: u32) {
        self.inner.lock().check_failures = n;
    }

    /// The next `n` submits calling environment function `func_name` fail
    /// in transit, before the node sees them.
    pub fn fail_environment_submits(&self, func_name: &str, n: u32) {
        self.inner
            .lock()
            .env_submit_failures
            .insert(func_name.to_string(), n);
    }

    /// The next `n` runs of environment function `func_name` are accepted
    /// but end with an error, leaving the environment untouched.
    pub fn fail_environment_runs(&self, func_name: &str, n: u32) {
        self.inner
            .lock()
            .env_run_failures
            .insert(func_name.to_string(), n);
    }

    /// Drop every run the node knows about, as a restarted node would.
    pub fn forget_runs(&self) {
        self.inner.lock().runs.clear();
    }

    pub fn submit_attempts(&self) -> usize {
        self.inner.lock().submit_attempts
    }

    pub fn check_count(&self) -> usize {
        self.inner.lock().check_count
    }

    /// Accepted submissions, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().submissions.clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.inner.lock().completions.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().cancelled.clone()
    }

    /// Current state of an environment module on a node.
    pub fn environment_state(&self, env: &str, node: &NodeAddress) -> Value {
        self.inner
            .lock()
            .environments
            .get(&(env.to_string(), node.clone()))
            .map(|e| e.state.clone())
            .unwrap_or(Value::Null)
    }

    /// Sequence numbers applied by one session, in application order.
    pub fn applied_sequences(&self, env: &str, node: &NodeAddress, session: u64) -> Vec<u64> {
        self.inner
            .lock()
            .environments
            .get(&(env.to_string(), node.clone()))
            .map(|e| {
                e.applied
                    .iter()
                    .filter(|(s, _)| *s == session)
                    .map(|(_, seq)| *seq)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn agent_result(module: &ModuleRef, params: &Params, node: &NodeAddress) -> Value {
    if module.id == "hello_world" {
        let first = params.get_str("firstname").unwrap_or("world");
        let last = params.get_str("surname").unwrap_or("");
        let name = format!("{} {}", first, last);
        return json!({ "greeting": format!("Hello, {}", name.trim()) });
    }
    json!({
        "module": module.id,
        "node": node.as_str(),
        "params": params.to_value(),
    })
}

/// Apply one environment operation. Sequencing mirrors a real environment
/// node: each session must present exactly `last + 1`.
fn apply_env(env: &mut EnvState, params: &Params) -> Result<Value> {
    let session = params
        .get("session_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::InvalidInput("missing session_id".into()))?;
    let sequence = params
        .get("sequence")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::InvalidInput("missing sequence".into()))?;
    let last = env.sessions.get(&session).copied().unwrap_or(0);
    if sequence != last + 1 {
        return Err(Error::EnvironmentConflict(format!(
            "session {} expected sequence {}, got {}",
            session,
            last + 1,
            sequence
        )));
    }

    if !env.state.is_object() {
        env.state = json!({});
    }
    let input = params.get("func_input_data").cloned().unwrap_or(Value::Null);
    let mut output = None;
    match params.get_str("func_name").unwrap_or_default() {
        "get_global_state" => {}
        "update_state" => {
            if let (Some(state), Some(update)) = (env.state.as_object_mut(), input.as_object()) {
                for (k, v) in update {
                    state.insert(k.clone(), v.clone());
                }
            }
        }
        "add_message" => push(&mut env.state, "messages", input),
        "enqueue" => push(&mut env.state, "queue", input),
        "dequeue" => {
            if let Some(queue) = env.state.get_mut("queue").and_then(Value::as_array_mut) {
                if !queue.is_empty() {
                    output = Some(queue.remove(0));
                }
            }
        }
        "reset" => env.state = json!({}),
        other => {
            return Err(Error::ModuleNotFound(format!("environment function {}", other)));
        }
    }

    env.sessions.insert(session, sequence);
    env.applied.push((session, sequence));
    let mut result = json!({ "sequence": sequence, "state": env.state.clone() });
    if let Some(item) = output {
        result["output"] = item;
    }
    Ok(result)
}

/// Decrement the counter for `key`; true while it was still positive.
fn take(counters: &mut HashMap<String, u32>, key: &str) -> bool {
    match counters.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

fn push(state: &mut Value, key: &str, item: Value) {
    let entry = state
        .as_object_mut()
        .map(|o| o.entry(key.to_string()).or_insert_with(|| json!([])));
    if let Some(Value::Array(items)) = entry {
        items.push(item);
    }
}

#[async_trait]
impl NodeTransport for FakeNode {
    async fn submit(&self, node: &NodeAddress, request: &SubmitRequest) -> Result<SubmitResponse> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        inner.submit_attempts += 1;
        if inner.down.contains(node) {
            return Err(Error::transport(node.as_str(), "connection refused"));
        }
        if inner.submit_failures > 0 {
            inner.submit_failures -= 1;
            return Err(Error::transport(node.as_str(), "connection reset"));
        }
        request
            .verify()
            .map_err(|e| Error::Auth(format!("bad signature: {}", e)))?;

        let module = request.module.clone();
        let behavior = inner.behaviors.get(&module.id).cloned().unwrap_or_default();
        if behavior.reject_auth {
            return Err(Error::Auth(format!("{} is not allowed to run {}", request.consumer_id, module)));
        }
        if behavior.missing {
            return Err(Error::ModuleNotFound(module.to_string()));
        }

        let outcome = if module.module_type == ModuleType::Environment {
            let func_name = request.params.get_str("func_name").unwrap_or_default();
            if take(&mut inner.env_submit_failures, func_name) {
                return Err(Error::transport(node.as_str(), "connection reset"));
            }
            if take(&mut inner.env_run_failures, func_name) {
                Outcome::Fail(format!("{} raised", func_name))
            } else {
                let env = inner
                    .environments
                    .entry((module.id.clone(), node.clone()))
                    .or_default();
                Outcome::Complete(apply_env(env, &request.params)?)
            }
        } else {
            let seen = inner.per_module.entry(module.id.clone()).or_insert(0);
            *seen += 1;
            if *seen <= behavior.fail_first {
                Outcome::Fail(format!("{} crashed on attempt {}", module.id, seen))
            } else {
                Outcome::Complete(agent_result(&module, &request.params, node))
            }
        };

        inner.next_id += 1;
        let run_id = format!("node-run-{}", inner.next_id);
        inner.runs.insert(
            run_id.clone(),
            FakeRun {
                module,
                node: node.clone(),
                checks: 0,
                outcome,
            },
        );
        inner.submissions.push(Submission {
            node: node.clone(),
            request: request.clone(),
            at: Instant::now(),
        });
        Ok(SubmitResponse { run_id })
    }

    async fn check(&self, node: &NodeAddress, run_id: &str) -> Result<CheckResponse> {
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock();
        inner.check_count += 1;
        if inner.down.contains(node) {
            return Err(Error::transport(node.as_str(), "connection refused"));
        }
        if inner.check_failures > 0 {
            inner.check_failures -= 1;
            return Err(Error::transport(node.as_str(), "connection reset"));
        }

        let Inner {
            behaviors,
            runs,
            completions,
            ..
        } = &mut *inner;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))?;
        let behavior = behaviors.get(&run.module.id).cloned().unwrap_or_default();
        run.checks += 1;

        let pending = |status| CheckResponse {
            run_id: run_id.to_string(),
            status,
            result: None,
            error: None,
        };
        if behavior.never_finish {
            return Ok(pending(NodeRunStatus::Running));
        }
        if run.checks <= behavior.pending_checks {
            return Ok(pending(if run.checks == 1 {
                NodeRunStatus::Pending
            } else {
                NodeRunStatus::Running
            }));
        }

        if run.checks == behavior.pending_checks + 1 {
            completions.push(Completion {
                module: run.module.id.clone(),
                node: run.node.clone(),
                at: Instant::now(),
            });
        }
        Ok(match &run.outcome {
            Outcome::Complete(value) => CheckResponse {
                run_id: run_id.to_string(),
                status: NodeRunStatus::Completed,
                result: Some(value.clone()),
                error: None,
            },
            Outcome::Fail(message) => CheckResponse {
                run_id: run_id.to_string(),
                status: NodeRunStatus::Error,
                result: None,
                error: Some(message.clone()),
            },
        })
    }

    async fn cancel(&self, _node: &NodeAddress, run_id: &str) -> Result<()> {
        self.inner.lock().cancelled.push(run_id.to_string());
        Ok(())
    }
}
