//! Orchestrator plans: a dependency graph of module runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use naptha_core::{Error, ModuleRef, ModuleType, Params, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Deserializer, Serialize};

use crate::environment::{Capabilities, OperationKind};

fn default_true() -> bool {
    true
}

fn default_state_key() -> String {
    "environment_state".to_string()
}

/// How a step uses a shared environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvBinding {
    #[serde(deserialize_with = "module_ref")]
    pub module: ModuleRef,
    /// Fold `GetGlobalState` into the step params before dispatch.
    #[serde(default = "default_true")]
    pub read_state: bool,
    /// Write `{step, result}` back after the step completes.
    #[serde(default = "default_true")]
    pub write_back: bool,
    #[serde(default = "default_state_key")]
    pub state_key: String,
    /// Operation names the environment supports; standard set when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

impl EnvBinding {
    pub fn new(module: ModuleRef) -> Self {
        Self {
            module,
            read_state: true,
            write_back: true,
            state_key: default_state_key(),
            capabilities: None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match &self.capabilities {
            Some(names) => Capabilities::from_names(names),
            None => Capabilities::standard(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(deserialize_with = "module_ref")]
    pub module: ModuleRef,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvBinding>,
    /// Per-step run deadline; the configured run deadline when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, module: ModuleRef) -> Self {
        Self {
            id: id.into(),
            module,
            params: Params::new(),
            depends_on: Vec::new(),
            environment: None,
            deadline_secs: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn with_environment(mut self, binding: EnvBinding) -> Self {
        self.environment = Some(binding);
        self
    }

    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.deadline_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorPlan {
    pub name: String,
    pub steps: Vec<PlanStep>,
}

impl OrchestratorPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Load a plan from YAML or JSON (JSON is valid YAML).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let plan: Self = serde_yaml::from_str(&raw)
            .map_err(|e| Error::InvalidPlan(format!("{}: {}", path.display(), e)))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn get(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn needs_environment(&self) -> bool {
        self.steps.iter().any(|s| s.environment.is_some())
    }

    /// Distinct environment modules the plan binds, sorted.
    pub fn environment_modules(&self) -> Vec<ModuleRef> {
        let modules: BTreeMap<String, &ModuleRef> = self
            .steps
            .iter()
            .filter_map(|s| s.environment.as_ref())
            .map(|b| (b.module.to_string(), &b.module))
            .collect();
        modules.into_values().cloned().collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.execution_order().map(|_| ())
    }

    /// Step ids in a dependency-respecting order. Fails on an empty plan,
    /// duplicate ids, unknown predecessors, cycles or bad bindings.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        if self.steps.is_empty() {
            return Err(Error::InvalidPlan(format!("plan {:?} has no steps", self.name)));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(Error::InvalidPlan("step with empty id".into()));
            }
            if index.insert(step.id.as_str(), graph.add_node(step.id.as_str())).is_some() {
                return Err(Error::InvalidPlan(format!("duplicate step id {:?}", step.id)));
            }
        }

        for step in &self.steps {
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                let from = index.get(dep.as_str()).ok_or_else(|| {
                    Error::InvalidPlan(format!("step {:?} depends on unknown step {:?}", step.id, dep))
                })?;
                if seen.insert(dep.as_str()) {
                    graph.add_edge(*from, index[step.id.as_str()], ());
                }
            }
            if let Some(binding) = &step.environment {
                check_binding(step, binding)?;
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            Error::InvalidPlan(format!(
                "dependency cycle through step {:?}",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(order.into_iter().map(|i| graph[i].to_string()).collect())
    }
}

fn check_binding(step: &PlanStep, binding: &EnvBinding) -> Result<()> {
    if binding.module.module_type != ModuleType::Environment {
        return Err(Error::InvalidPlan(format!(
            "step {:?} binds {} which is not an environment",
            step.id, binding.module
        )));
    }
    let caps = binding.capabilities();
    if binding.read_state && !caps.supports(&OperationKind::GetGlobalState) {
        return Err(Error::InvalidPlan(format!(
            "step {:?} reads state but {} does not support get_global_state",
            step.id, binding.module
        )));
    }
    if binding.write_back && !caps.supports(&OperationKind::UpdateState) {
        return Err(Error::InvalidPlan(format!(
            "step {:?} writes back but {} does not support update_state",
            step.id, binding.module
        )));
    }
    Ok(())
}

/// Accept either `"type:name@version"` or the structured form.
fn module_ref<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ModuleRef, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Full(ModuleRef),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Text(s) => ModuleRef::parse(&s).map_err(serde::de::Error::custom),
        Repr::Full(m) => Ok(m),
    }
}
