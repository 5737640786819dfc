//! Orchestration Coordinator: executes an [`OrchestratorPlan`] as a set of
//! sub-runs spread over a worker pool.
//!
//! Steps whose predecessors have all completed are dispatched concurrently.
//! The first step that fails for good stops the plan: nothing new is
//! scheduled, in-flight steps are dropped and cancelled on their nodes, and
//! the report carries whatever completed before that point.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use naptha_core::{
    Error, FailureKind, NodeAddress, Result, RetrySettings, RunFailure, RunId, RunStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::RunDispatcher;
use crate::environment::{EnvOperation, EnvironmentProxy};
use crate::plan::{OrchestratorPlan, PlanStep};
use crate::selection::{NodeSelector, RoundRobin};
use crate::types::{PlanReport, PlanStatus, StepFailure, StepResult};

/// Runs that belong to in-flight steps, by step id.
type Tracked = Mutex<HashMap<String, RunId>>;

pub struct OrchestrationCoordinator {
    dispatcher: Arc<RunDispatcher>,
    environments: Arc<EnvironmentProxy>,
    selector: Arc<dyn NodeSelector>,
    retry: RetrySettings,
}

impl OrchestrationCoordinator {
    pub fn new(dispatcher: Arc<RunDispatcher>, environments: Arc<EnvironmentProxy>) -> Self {
        let retry = dispatcher.retry_settings().clone();
        Self {
            dispatcher,
            environments,
            selector: Arc::new(RoundRobin::new()),
            retry,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn NodeSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn dispatcher(&self) -> &Arc<RunDispatcher> {
        &self.dispatcher
    }

    pub async fn execute(
        &self,
        plan: &OrchestratorPlan,
        workers: &[NodeAddress],
        environment_nodes: &[NodeAddress],
    ) -> Result<PlanReport> {
        self.execute_with_cancel(plan, workers, environment_nodes, CancellationToken::new())
            .await
    }

    /// Execute `plan`. Only validation problems are returned as `Err`; run
    /// failures are reported in the `PlanReport`.
    pub async fn execute_with_cancel(
        &self,
        plan: &OrchestratorPlan,
        workers: &[NodeAddress],
        environment_nodes: &[NodeAddress],
        cancel: CancellationToken,
    ) -> Result<PlanReport> {
        let order = plan.execution_order()?;
        if workers.is_empty() {
            return Err(Error::InvalidPlan(format!(
                "no worker nodes to run plan {:?}",
                plan.name
            )));
        }
        let placement = place_environments(plan, environment_nodes)?;

        // Predecessor counts and reverse edges, with duplicate edges collapsed.
        let mut waiting: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &plan.steps {
            let deps: HashSet<&str> = step.depends_on.iter().map(String::as_str).collect();
            waiting.insert(step.id.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(step.id.as_str());
            }
        }
        let mut ready: VecDeque<&str> = order
            .iter()
            .filter_map(|id| plan.get(id))
            .filter(|s| waiting[s.id.as_str()] == 0)
            .map(|s| s.id.as_str())
            .collect();

        info!(
            "Executing plan {:?}: {} steps on {} workers",
            plan.name,
            plan.steps.len(),
            workers.len()
        );

        let tracked: Tracked = Mutex::new(HashMap::new());
        let mut results: BTreeMap<String, StepResult> = BTreeMap::new();
        let mut running: HashSet<&str> = HashSet::new();
        let mut failure: Option<StepFailure> = None;
        let mut cancelled = false;
        let mut in_flight = FuturesUnordered::new();
        let limit = self.retry.max_parallel_steps.max(1);

        loop {
            while in_flight.len() < limit {
                let Some(id) = ready.pop_front() else { break };
                let Some(step) = plan.get(id) else { continue };
                let env_node = step
                    .environment
                    .as_ref()
                    .and_then(|b| placement.get(&b.module.to_string()));
                debug!("Dispatching step {:?} ({})", id, step.module);
                running.insert(id);
                let tracked = &tracked;
                in_flight.push(async move {
                    (id, self.run_step(step, workers, env_node, tracked).await)
                });
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Plan {:?} cancelled", plan.name);
                    cancelled = true;
                    break;
                }
                Some((id, outcome)) = in_flight.next() => {
                    running.remove(id);
                    match outcome {
                        Ok(result) => {
                            debug!("Step {:?} completed on {}", id, result.node);
                            results.insert(id.to_string(), result);
                            for next in dependents.get(id).into_iter().flatten() {
                                if let Some(n) = waiting.get_mut(next) {
                                    *n -= 1;
                                    if *n == 0 {
                                        ready.push_back(*next);
                                    }
                                }
                            }
                        }
                        Err(f) => {
                            error!("Plan {:?} failed: {}", plan.name, f);
                            failure = Some(f);
                            break;
                        }
                    }
                }
            }
        }
        drop(in_flight);

        self.cancel_abandoned(tracked.into_inner());

        let mut abandoned: Vec<String> = running.iter().map(|s| s.to_string()).collect();
        abandoned.sort();
        let failed_step = failure.as_ref().map(|f| f.step.as_str());
        let not_started: Vec<String> = order
            .iter()
            .filter(|id| {
                !results.contains_key(id.as_str())
                    && !running.contains(id.as_str())
                    && failed_step != Some(id.as_str())
            })
            .cloned()
            .collect();

        let status = if cancelled {
            PlanStatus::Cancelled
        } else if failure.is_some() {
            PlanStatus::Failed
        } else {
            PlanStatus::Completed
        };
        info!(
            "Plan {:?} finished: {:?} ({}/{} steps completed)",
            plan.name,
            status,
            results.len(),
            plan.steps.len()
        );

        Ok(PlanReport {
            plan: plan.name.clone(),
            status,
            results,
            failure,
            abandoned,
            not_started,
        })
    }

    /// Best-effort cancel of runs whose step futures were dropped.
    fn cancel_abandoned(&self, runs: HashMap<String, RunId>) {
        for (step, run_id) in runs {
            debug!("Cancelling run {} of abandoned step {:?}", run_id, step);
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                if let Err(e) = dispatcher.cancel(&run_id).await {
                    warn!("Cancel of {} failed: {}", run_id, e);
                }
                dispatcher.discard(&run_id);
            });
        }
    }

    /// Run one step to completion, retrying on other workers.
    async fn run_step(
        &self,
        step: &PlanStep,
        workers: &[NodeAddress],
        env_node: Option<&NodeAddress>,
        tracked: &Tracked,
    ) -> std::result::Result<StepResult, StepFailure> {
        let policy = &self.retry.step;
        let mut tried: Vec<NodeAddress> = Vec::new();
        let mut attempts = 0u32;
        let mut timeouts = 0u32;

        loop {
            attempts += 1;
            let Some(node) = self.selector.select(workers, &tried) else {
                return Err(StepFailure {
                    step: step.id.clone(),
                    kind: FailureKind::Unreachable,
                    message: "no worker available".into(),
                    node: None,
                    attempts,
                });
            };

            let failure = match self.attempt_step(step, &node, env_node, tracked).await {
                Ok(result) => {
                    return Ok(StepResult {
                        module: step.module.to_string(),
                        node,
                        result,
                    })
                }
                Err(f) => f,
            };

            let retry = match failure.kind {
                kind if kind.is_permanent() => false,
                FailureKind::Timeout => {
                    timeouts += 1;
                    timeouts <= self.retry.timeout_retries
                }
                _ => policy.allows_retry(attempts),
            };
            if !retry {
                return Err(StepFailure {
                    step: step.id.clone(),
                    kind: failure.kind,
                    message: failure.message,
                    node: Some(node),
                    attempts,
                });
            }

            let delay = policy.delay(attempts - 1);
            warn!(
                "Step {:?} failed on {} (attempt {}): {}; retrying on another node in {:?}",
                step.id, node, attempts, failure, delay
            );
            tried.push(node);
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt: environment read, run, environment write-back.
    async fn attempt_step(
        &self,
        step: &PlanStep,
        node: &NodeAddress,
        env_node: Option<&NodeAddress>,
        tracked: &Tracked,
    ) -> std::result::Result<Value, RunFailure> {
        let mut params = step.params.clone();

        let session = match (&step.environment, env_node) {
            (Some(binding), Some(env_node)) => {
                let handle = self
                    .environments
                    .open(&binding.module, env_node, binding.capabilities());
                if binding.read_state {
                    let state = self
                        .environments
                        .read_state(&handle)
                        .await
                        .map_err(environment_failure)?;
                    params.insert(binding.state_key.clone(), state);
                }
                Some((binding, handle))
            }
            _ => None,
        };

        let timeout = step
            .deadline_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.retry.run_deadline());
        let deadline = Instant::now() + timeout;

        let run_id = self.dispatcher.prepare(step.module.clone(), params, node.clone());
        tracked.lock().insert(step.id.clone(), run_id.clone());
        let outcome = self.dispatcher.settle(&run_id, deadline).await;
        tracked.lock().remove(&step.id);
        self.dispatcher.discard(&run_id);

        let outcome =
            outcome.map_err(|e| RunFailure::new(FailureKind::from_error(&e), e.to_string()))?;
        let result = match outcome.status {
            RunStatus::Completed => outcome.result.unwrap_or(Value::Null),
            _ => {
                return Err(outcome.failure.unwrap_or_else(|| {
                    RunFailure::new(FailureKind::Application, "run ended without a result")
                }))
            }
        };

        if let Some((binding, handle)) = session {
            if binding.write_back {
                self.environments
                    .apply(
                        &handle,
                        EnvOperation::UpdateState {
                            state: json!({ "step": step.id, "result": result }),
                        },
                    )
                    .await
                    .map_err(environment_failure)?;
            }
        }
        Ok(result)
    }
}

/// Failures of the environment read or write-back are reported as
/// environment failures; permanent rejections keep their own kind.
fn environment_failure(e: Error) -> RunFailure {
    let kind = match FailureKind::from_error(&e) {
        kind if kind.is_permanent() => kind,
        _ => FailureKind::Environment,
    };
    RunFailure::new(kind, e.to_string())
}

/// Map each environment module onto one environment node, deterministically.
fn place_environments(
    plan: &OrchestratorPlan,
    environment_nodes: &[NodeAddress],
) -> Result<HashMap<String, NodeAddress>> {
    let modules = plan.environment_modules();
    if modules.is_empty() {
        return Ok(HashMap::new());
    }
    if environment_nodes.is_empty() {
        return Err(Error::InvalidPlan(format!(
            "plan {:?} binds environments but no environment nodes were given",
            plan.name
        )));
    }
    let mut nodes = environment_nodes.to_vec();
    nodes.sort();
    nodes.dedup();
    Ok(modules
        .into_iter()
        .enumerate()
        .map(|(i, m)| (m.to_string(), nodes[i % nodes.len()].clone()))
        .collect())
}
