//! Runtime: the orchestration engine.
//!
//! The `RunDispatcher` submits and polls single runs, the
//! `EnvironmentProxy` sequences operations on shared environment modules,
//! and the `OrchestrationCoordinator` drives a dependency plan of sub-runs
//! across a worker pool on top of both.

pub mod cache;
pub mod coordinator;
pub mod dispatcher;
pub mod environment;
pub mod plan;
pub mod selection;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CachedRun, RunCache};
pub use coordinator::OrchestrationCoordinator;
pub use dispatcher::RunDispatcher;
pub use environment::{
    Capabilities, EnvOperation, EnvRequest, EnvironmentProxy, OperationKind, SessionHandle,
    StateSnapshot,
};
pub use plan::{EnvBinding, OrchestratorPlan, PlanStep};
pub use selection::{NodeSelector, RandomSelector, RoundRobin, SelectionPolicy};
pub use store::RunStore;
pub use types::*;
