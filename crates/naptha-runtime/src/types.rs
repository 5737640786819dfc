//! Runtime result types.

use std::collections::BTreeMap;

use naptha_core::{Error, FailureKind, NodeAddress, Result, RunFailure, RunId, RunRecord, RunStatus};
use serde::Serialize;

/// What a poll observed: a status plus either the result or the failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl PollOutcome {
    pub fn from_record(record: &RunRecord) -> Self {
        Self {
            run_id: record.id.clone(),
            status: record.status,
            result: record.result.clone(),
            failure: record.failure.clone(),
        }
    }

    /// Turn a terminal outcome into the run's value or the matching error.
    pub fn into_result(self) -> Result<serde_json::Value> {
        let run_id = self.run_id.to_string();
        match self.status {
            RunStatus::Completed => Ok(self.result.unwrap_or(serde_json::Value::Null)),
            RunStatus::TimedOut => Err(Error::RunTimedOut { run_id }),
            RunStatus::Failed => {
                let failure = self
                    .failure
                    .unwrap_or_else(|| RunFailure::new(FailureKind::Application, "unknown failure"));
                Err(match failure.kind {
                    FailureKind::Auth => Error::Auth(failure.message),
                    FailureKind::ModuleNotFound => Error::ModuleNotFound(failure.message),
                    FailureKind::Timeout => Error::RunTimedOut { run_id },
                    FailureKind::Unreachable => Error::transport("node", failure.message),
                    _ => Error::RunFailed {
                        run_id,
                        message: failure.message,
                    },
                })
            }
            status => Err(Error::Internal(format!(
                "run {} is not terminal ({})",
                run_id, status
            ))),
        }
    }
}

/// Result of one completed plan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub module: String,
    pub node: NodeAddress,
    pub result: serde_json::Value,
}

/// The step that brought a plan down, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeAddress>,
    pub attempts: u32,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step {:?} failed after {} attempt(s) ({}): {}",
            self.step, self.attempts, self.kind, self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Aggregated outcome of a plan execution, including partial progress.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub plan: String,
    pub status: PlanStatus,
    /// Results of every step that completed, keyed by step id.
    pub results: BTreeMap<String, StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Steps that were in flight when the plan stopped; their results are discarded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abandoned: Vec<String>,
    /// Steps that were never dispatched.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_started: Vec<String>,
}

impl PlanReport {
    pub fn is_completed(&self) -> bool {
        self.status == PlanStatus::Completed
    }

    /// Step results as one JSON object `{step_id: result}`.
    pub fn aggregate(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.results
                .iter()
                .map(|(id, r)| (id.clone(), r.result.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use naptha_core::{ModuleRef, Params, RunRequest};

    fn record() -> RunRecord {
        RunRecord::new(RunRequest {
            module: ModuleRef::agent("a"),
            params: Params::new(),
            node: NodeAddress::new("http://n1:7001").unwrap(),
            requester: "ab".into(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_into_result_maps_failures() {
        let mut r = record();
        r.fail(RunFailure::new(FailureKind::Application, "boom"));
        let err = PollOutcome::from_record(&r).into_result().unwrap_err();
        assert!(matches!(err, Error::RunFailed { .. }));

        let mut r = record();
        r.time_out();
        let err = PollOutcome::from_record(&r).into_result().unwrap_err();
        assert!(matches!(err, Error::RunTimedOut { .. }));

        let mut r = record();
        r.complete(serde_json::json!({"ok": true}));
        assert_eq!(
            PollOutcome::from_record(&r).into_result().unwrap(),
            serde_json::json!({"ok": true})
        );
    }
}
