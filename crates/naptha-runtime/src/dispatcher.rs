//! Run Dispatcher: submits one module run to one node and tracks it.
//!
//! Lifecycle: Created → Submitted → Running → {Completed, Failed, TimedOut}.
//! Terminal states are absorbing. The record store belongs to the
//! dispatcher; the coordinator shares it through an `Arc<RunDispatcher>`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use naptha_core::{
    BackoffPolicy, Error, FailureKind, ModuleRef, NodeAddress, Params, Result, RetrySettings, RunFailure, RunId,
    RunRecord, RunRequest, RunStatus,
};
use naptha_identity::Identity;
use naptha_node::{CheckResponse, NodeTransport, SubmitRequest};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::store::RunStore;
use crate::types::PollOutcome;

pub struct RunDispatcher {
    transport: Arc<dyn NodeTransport>,
    identity: Arc<Identity>,
    retry: RetrySettings,
    store: RunStore,
}

impl RunDispatcher {
    pub fn new(
        transport: Arc<dyn NodeTransport>,
        identity: Arc<Identity>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            transport,
            identity,
            retry,
            store: RunStore::new(),
        }
    }

    pub fn retry_settings(&self) -> &RetrySettings {
        &self.retry
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Submit `module` to `node`, signed with the caller identity.
    ///
    /// Transport failures are retried with the submit backoff policy. When
    /// retries run out the record is Failed with an unreachable-node cause.
    /// Auth and module-not-found rejections fail the record immediately.
    /// In every failure case the record stays in the store for inspection.
    pub async fn submit(&self, module: ModuleRef, params: Params, node: NodeAddress) -> Result<RunId> {
        let id = self.prepare(module, params, node);
        self.dispatch(&id).await?;
        Ok(id)
    }

    /// Create a record in `Created` without contacting the node.
    pub fn prepare(&self, module: ModuleRef, params: Params, node: NodeAddress) -> RunId {
        self.store.insert(RunRecord::new(RunRequest {
            module,
            params,
            node,
            requester: self.identity.public_key_hex(),
            created_at: Utc::now(),
        }))
    }

    /// Submit a prepared record.
    pub async fn dispatch(&self, id: &RunId) -> Result<()> {
        self.dispatch_with(id, &self.retry.submit).await
    }

    /// Submit a prepared record, retrying transport failures per `policy`.
    /// `Ok` means the node accepted the run.
    pub async fn dispatch_with(&self, id: &RunId, policy: &BackoffPolicy) -> Result<()> {
        let (request, node) = self.store.with(id, |r| {
            if r.status != RunStatus::Created {
                return Err(Error::InvalidInput(format!("run {} was already submitted", id)));
            }
            Ok((r.request.clone(), r.node().clone()))
        })??;

        let signed = match SubmitRequest::signed(
            request.module,
            request.params,
            request.created_at,
            &self.identity,
        ) {
            Ok(r) => r,
            Err(e) => {
                self.fail(id, FailureKind::from_error(&e), e.to_string());
                return Err(e);
            }
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.transport.submit(&node, &signed).await {
                Ok(response) => {
                    let accepted = self.store.update(id, |r| {
                        r.node_run_id = Some(response.run_id.clone());
                        r.advance(RunStatus::Submitted)
                    })?;
                    if !accepted {
                        // Cancelled while the submit was in flight.
                        if let Err(e) = self.transport.cancel(&node, &response.run_id).await {
                            warn!("Node {} did not acknowledge cancel of {}: {}", node, id, e);
                        }
                        return Ok(());
                    }
                    info!(
                        "Submitted {} to {} (run {}, node run {})",
                        signed.module, node, id, response.run_id
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && policy.allows_retry(attempts) => {
                    if self.store.with(id, |r| r.status.is_terminal())? {
                        return Ok(());
                    }
                    let delay = policy.delay(attempts - 1);
                    warn!(
                        "Submit of {} to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        signed.module, node, attempts, policy.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let kind = FailureKind::from_error(&e);
                    error!("Submit of {} to {} failed ({}): {}", signed.module, node, kind, e);
                    self.fail(id, kind, e.to_string());
                    return Err(e);
                }
            }
        }
    }

    /// Poll until the run is terminal or `deadline` passes.
    ///
    /// Polling a terminal run returns the cached outcome without touching
    /// the network. A missed deadline marks the run TimedOut.
    pub async fn poll(&self, id: &RunId, deadline: Instant) -> Result<PollOutcome> {
        let mut polls = 0u32;
        loop {
            let status = self.refresh(id, deadline).await?;
            if status.is_terminal() {
                return self.outcome(id);
            }
            let wake = (Instant::now() + self.retry.poll.delay(polls)).min(deadline);
            polls = polls.saturating_add(1);
            tokio::time::sleep_until(wake).await;
        }
    }

    pub async fn poll_for(&self, id: &RunId, timeout: Duration) -> Result<PollOutcome> {
        self.poll(id, Instant::now() + timeout).await
    }

    /// Submit and poll to completion within `timeout`.
    pub async fn run(
        &self,
        module: ModuleRef,
        params: Params,
        node: NodeAddress,
        timeout: Duration,
    ) -> Result<PollOutcome> {
        let deadline = Instant::now() + timeout;
        let id = self.submit(module, params, node).await?;
        self.poll(&id, deadline).await
    }

    /// Like [`RunDispatcher::run`], but the record is dropped once the
    /// outcome is known. Used for sub-runs nobody will look up again.
    pub async fn run_detached(
        &self,
        module: ModuleRef,
        params: Params,
        node: NodeAddress,
        timeout: Duration,
    ) -> Result<PollOutcome> {
        let deadline = Instant::now() + timeout;
        let id = self.prepare(module, params, node);
        let outcome = self.settle(&id, deadline).await;
        self.store.remove(&id);
        outcome
    }

    /// Dispatch a prepared record and poll it to a terminal status.
    pub async fn settle(&self, id: &RunId, deadline: Instant) -> Result<PollOutcome> {
        self.dispatch(id).await?;
        self.poll(id, deadline).await
    }

    /// Stream each status transition until the run is terminal.
    pub fn watch(
        self: &Arc<Self>,
        id: RunId,
        deadline: Instant,
    ) -> impl Stream<Item = Result<RunStatus>> + Send + 'static {
        let dispatcher = Arc::clone(self);
        async_stream::stream! {
            let mut last: Option<RunStatus> = None;
            let mut polls = 0u32;
            loop {
                let status = match dispatcher.refresh(&id, deadline).await {
                    Ok(s) => s,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if last != Some(status) {
                    last = Some(status);
                    yield Ok(status);
                }
                if status.is_terminal() {
                    return;
                }
                let wake = (Instant::now() + dispatcher.retry.poll.delay(polls)).min(deadline);
                polls = polls.saturating_add(1);
                tokio::time::sleep_until(wake).await;
            }
        }
    }

    /// Best-effort cancel. The record is marked Failed (cancelled) locally
    /// whether or not the node acknowledges.
    pub async fn cancel(&self, id: &RunId) -> Result<()> {
        let (node, node_run_id, changed) = self.store.update(id, |r| {
            let changed = r.fail(RunFailure::new(FailureKind::Cancelled, "cancelled by caller"));
            (r.node().clone(), r.node_run_id.clone(), changed)
        })?;
        if !changed {
            debug!("Cancel of {} ignored: already terminal", id);
            return Ok(());
        }
        if let Some(node_run_id) = node_run_id {
            if let Err(e) = self.transport.cancel(&node, &node_run_id).await {
                warn!("Node {} did not acknowledge cancel of {}: {}", node, id, e);
            }
        }
        info!("Cancelled run {}", id);
        Ok(())
    }

    pub fn record(&self, id: &RunId) -> Option<RunRecord> {
        self.store.get(id)
    }

    pub fn records(&self) -> Vec<RunRecord> {
        self.store.list()
    }

    /// Drop a delivered record from the store.
    pub fn discard(&self, id: &RunId) -> Option<RunRecord> {
        self.store.remove(id)
    }

    pub fn outcome(&self, id: &RunId) -> Result<PollOutcome> {
        self.store.with(id, PollOutcome::from_record)
    }

    /// One check against the node, bounded by `deadline`. Returns the
    /// record's status afterwards.
    async fn refresh(&self, id: &RunId, deadline: Instant) -> Result<RunStatus> {
        let (status, node, node_run_id) = self
            .store
            .with(id, |r| (r.status, r.node().clone(), r.node_run_id.clone()))?;
        if status.is_terminal() {
            return Ok(status);
        }
        let node_run_id = node_run_id
            .ok_or_else(|| Error::InvalidInput(format!("run {} has not been submitted", id)))?;

        if Instant::now() >= deadline {
            return self.time_out(id);
        }

        match tokio::time::timeout_at(deadline, self.transport.check(&node, &node_run_id)).await {
            Err(_elapsed) => self.time_out(id),
            Ok(Ok(response)) => self.apply_check(id, response),
            Ok(Err(e)) if e.is_retryable() => {
                warn!("Poll of {} on {} failed, will retry: {}", id, node, e);
                Ok(status)
            }
            Ok(Err(e)) => {
                let kind = FailureKind::from_error(&e);
                error!("Poll of {} on {} rejected ({}): {}", id, node, kind, e);
                self.fail(id, kind, e.to_string());
                self.store.with(id, |r| r.status)
            }
        }
    }

    fn apply_check(&self, id: &RunId, response: CheckResponse) -> Result<RunStatus> {
        let next = response.status.to_run_status();
        self.store.update(id, |r| {
            let changed = match next {
                RunStatus::Completed => {
                    r.complete(response.result.unwrap_or(serde_json::Value::Null))
                }
                RunStatus::Failed => r.fail(RunFailure::new(
                    FailureKind::Application,
                    response
                        .error
                        .unwrap_or_else(|| "node reported an error".to_string()),
                )),
                other => r.advance(other),
            };
            if changed {
                debug!("Run {} is now {}", r.id, r.status);
                if r.status == RunStatus::Failed {
                    if let Some(f) = &r.failure {
                        warn!("Run {} ({}) failed on {}: {}", r.id, r.request.module, r.node(), f);
                    }
                }
            }
            r.status
        })
    }

    fn time_out(&self, id: &RunId) -> Result<RunStatus> {
        self.store.update(id, |r| {
            if r.time_out() {
                warn!("Run {} ({}) timed out on {}", r.id, r.request.module, r.node());
            }
            r.status
        })
    }

    fn fail(&self, id: &RunId, kind: FailureKind, message: String) {
        let _ = self.store.update(id, |r| r.fail(RunFailure::new(kind, message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_retry, Behavior, FakeNode};
    use futures::StreamExt;

    fn node(n: u8) -> NodeAddress {
        NodeAddress::new(format!("http://node{}:7001", n)).unwrap()
    }

    fn dispatcher(fake: &Arc<FakeNode>) -> Arc<RunDispatcher> {
        Arc::new(RunDispatcher::new(
            fake.clone(),
            Arc::new(Identity::generate()),
            fast_retry(),
        ))
    }

    #[tokio::test]
    async fn test_hello_world_completes_and_repoll_is_idempotent() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("hello_world", Behavior::default().pending(3));
        let d = dispatcher(&fake);

        let params = Params::new().with("firstname", "sam").with("surname", "altman");
        let id = d
            .submit(ModuleRef::agent("hello_world"), params, node(1))
            .await
            .unwrap();
        let first = d.poll_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        let greeting = first.result.clone().unwrap();
        assert_eq!(greeting["greeting"], "Hello, sam altman");

        let checks_before = fake.check_count();
        let second = d.poll_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fake.check_count(), checks_before);
    }

    #[tokio::test]
    async fn test_run_unknown_to_node_is_not_a_missing_module() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("echo", Behavior::default().pending(10));
        let d = dispatcher(&fake);
        let id = d
            .submit(ModuleRef::agent("echo"), Params::new(), node(1))
            .await
            .unwrap();
        fake.forget_runs();

        let outcome = d.poll_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Application);
        assert!(failure.message.contains("Not found"));
    }

    #[tokio::test]
    async fn test_submit_is_signed() {
        let fake = Arc::new(FakeNode::new());
        let d = dispatcher(&fake);
        d.submit(ModuleRef::agent("echo"), Params::new(), node(1))
            .await
            .unwrap();
        let submitted = fake.submissions();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].request.verify().is_ok());
        assert_eq!(submitted[0].request.public_key, d.identity().public_key_hex());
    }

    #[tokio::test]
    async fn test_transient_submit_failures_are_retried() {
        let fake = Arc::new(FakeNode::new());
        fake.fail_next_submits(2);
        let d = dispatcher(&fake);
        let id = d
            .submit(ModuleRef::agent("echo"), Params::new(), node(1))
            .await
            .unwrap();
        assert_eq!(d.record(&id).unwrap().status, RunStatus::Submitted);
        assert_eq!(fake.submit_attempts(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_with_distinct_cause() {
        let fake = Arc::new(FakeNode::new());
        fake.take_down(&node(2));
        let d = dispatcher(&fake);
        let err = d
            .submit(ModuleRef::agent("echo"), Params::new(), node(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));

        let record = d.records().pop().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.failure.unwrap().kind, FailureKind::Unreachable);
        assert_eq!(fake.submit_attempts(), fast_retry().submit.max_attempts as usize);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("secret", Behavior::default().reject_auth());
        let d = dispatcher(&fake);
        let err = d
            .submit(ModuleRef::agent("secret"), Params::new(), node(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(fake.submit_attempts(), 1);
        assert_eq!(
            d.records()[0].failure.as_ref().unwrap().kind,
            FailureKind::Auth
        );
    }

    #[tokio::test]
    async fn test_application_failure_is_failed_not_timed_out() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("flaky", Behavior::default().fail_first(1));
        let d = dispatcher(&fake);
        let outcome = d
            .run(ModuleRef::agent("flaky"), Params::new(), node(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Application);
    }

    #[tokio::test]
    async fn test_deadline_yields_timed_out_and_is_absorbing() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("slow", Behavior::default().never_finish());
        let d = dispatcher(&fake);
        let id = d
            .submit(ModuleRef::agent("slow"), Params::new(), node(1))
            .await
            .unwrap();

        let started = Instant::now();
        let outcome = d.poll_for(&id, Duration::from_millis(100)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.status, RunStatus::TimedOut);

        // The node finishing later does not resurrect the record.
        fake.set_behavior("slow", Behavior::default());
        let again = d.poll_for(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(again.status, RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_poll_survives_transient_check_failures() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("echo", Behavior::default().pending(2));
        fake.fail_next_checks(3);
        let d = dispatcher(&fake);
        let outcome = d
            .run(ModuleRef::agent("echo"), Params::new(), node(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_is_best_effort_and_terminal() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("slow", Behavior::default().never_finish());
        let d = dispatcher(&fake);
        let id = d
            .submit(ModuleRef::agent("slow"), Params::new(), node(1))
            .await
            .unwrap();
        d.cancel(&id).await.unwrap();
        assert_eq!(fake.cancelled().len(), 1);

        let outcome = d.poll_for(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Cancelled);

        // Cancelling again is a no-op.
        d.cancel(&id).await.unwrap();
        assert_eq!(fake.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_yields_monotonic_transitions() {
        let fake = Arc::new(FakeNode::new());
        fake.set_behavior("echo", Behavior::default().pending(3));
        let d = dispatcher(&fake);
        let id = d
            .submit(ModuleRef::agent("echo"), Params::new(), node(1))
            .await
            .unwrap();

        let statuses: Vec<RunStatus> = d
            .watch(id, Instant::now() + Duration::from_secs(5))
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(
            statuses,
            vec![RunStatus::Submitted, RunStatus::Running, RunStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_unknown_run_id() {
        let fake = Arc::new(FakeNode::new());
        let d = dispatcher(&fake);
        let err = d
            .poll_for(&RunId::from("nope"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_discard_removes_record() {
        let fake = Arc::new(FakeNode::new());
        let d = dispatcher(&fake);
        let outcome = d
            .run(ModuleRef::agent("echo"), Params::new(), node(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(d.discard(&outcome.run_id).is_some());
        assert!(d.record(&outcome.run_id).is_none());
    }
}
