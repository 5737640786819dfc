//! `naptha run`: one module on one node, or a plan across a worker pool.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _};
use futures::{pin_mut, StreamExt};
use naptha_core::{FailureKind, ModuleRef, ModuleType, NodeAddress, Params, RunStatus};
use naptha_runtime::{OrchestratorPlan, PlanReport, PlanStatus, PollOutcome};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Exit;
use crate::cli::RunArgs;
use crate::context::AppContext;

pub async fn run(ctx: &AppContext, args: RunArgs) -> anyhow::Result<Exit> {
    let module = ModuleRef::parse(&args.module)?;
    let params = match (&args.parameters, &args.file) {
        (Some(p), _) => Params::parse_cli(p)?,
        (None, Some(file)) => Params::from_file(file)?,
        (None, None) => Params::new(),
    };
    let workers = match &args.worker_nodes {
        Some(list) => NodeAddress::parse_list(list)?,
        None => Vec::new(),
    };
    let environment_nodes = match &args.environment_nodes {
        Some(list) => NodeAddress::parse_list(list)?,
        None => Vec::new(),
    };
    let personas: Vec<String> = args
        .personas_urls
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let deadline = Duration::from_secs(args.deadline.unwrap_or(ctx.config.retry.run_deadline_secs));

    if let Some(plan) = &args.plan {
        if !personas.is_empty() {
            bail!("--personas-urls applies to agent runs, not plans");
        }
        let workers = if workers.is_empty() {
            vec![ctx.config.node_url.clone()]
        } else {
            workers
        };
        return run_plan(ctx, plan, params, &workers, &environment_nodes, args.deadline, args.json).await;
    }

    let deployment = Deployment::resolve(
        &module,
        params,
        &ctx.config.node_url,
        &workers,
        &environment_nodes,
        &personas,
    )?;
    for node in &deployment.register {
        ctx.ensure_user(node).await?;
    }

    let result = run_single(ctx, module, deployment.params, deployment.node, deadline, args.json).await;
    if let Err(e) = ctx.save_runs() {
        warn!("Failed to save run cache: {:#}", e);
    }
    result
}

/// Where a single run is submitted and what it learns about the other
/// nodes taking part.
#[derive(Debug)]
struct Deployment {
    node: NodeAddress,
    params: Params,
    /// Nodes the identity is registered with before submitting.
    register: Vec<NodeAddress>,
}

impl Deployment {
    /// Orchestrators run on the default node and receive the worker and
    /// environment nodes as `worker_nodes` / `environment_nodes`. Agents and
    /// environments run on exactly one node, so extra nodes are an error.
    fn resolve(
        module: &ModuleRef,
        mut params: Params,
        default_node: &NodeAddress,
        workers: &[NodeAddress],
        environment_nodes: &[NodeAddress],
        personas: &[String],
    ) -> anyhow::Result<Self> {
        if !personas.is_empty() && module.module_type != ModuleType::Agent {
            bail!("--personas-urls applies to agent runs, not {}", module.module_type);
        }
        let urls = |nodes: &[NodeAddress]| -> Vec<String> {
            nodes.iter().map(|n| n.as_str().to_string()).collect()
        };

        match module.module_type {
            ModuleType::Orchestrator => {
                let workers = if workers.is_empty() {
                    std::slice::from_ref(default_node)
                } else {
                    workers
                };
                params.insert("worker_nodes", urls(workers));
                params.insert("environment_nodes", urls(environment_nodes));
                let mut register: Vec<NodeAddress> = std::iter::once(default_node)
                    .chain(workers)
                    .chain(environment_nodes)
                    .cloned()
                    .collect();
                register.sort();
                register.dedup();
                Ok(Self {
                    node: default_node.clone(),
                    params,
                    register,
                })
            }
            ModuleType::Environment => {
                if environment_nodes.len() > 1 || workers.len() > 1 {
                    bail!("an environment run targets one node; use --plan to spread work");
                }
                let node = environment_nodes
                    .first()
                    .or(workers.first())
                    .unwrap_or(default_node)
                    .clone();
                Ok(Self {
                    register: vec![node.clone()],
                    node,
                    params,
                })
            }
            ModuleType::Agent | ModuleType::Persona => {
                if workers.len() > 1 {
                    bail!(
                        "{} runs on one node but {} were given; use --plan or an orchestrator",
                        module,
                        workers.len()
                    );
                }
                if !environment_nodes.is_empty() {
                    bail!("--environment-nodes applies to orchestrator and environment runs");
                }
                if !personas.is_empty() {
                    params.insert("personas_urls", personas.to_vec());
                }
                let node = workers.first().unwrap_or(default_node).clone();
                Ok(Self {
                    register: vec![node.clone()],
                    node,
                    params,
                })
            }
        }
    }
}

async fn run_single(
    ctx: &AppContext,
    module: ModuleRef,
    params: Params,
    node: NodeAddress,
    deadline: Duration,
    json: bool,
) -> anyhow::Result<Exit> {
    let dispatcher = &ctx.dispatcher;
    let id = dispatcher.submit(module.clone(), params, node.clone()).await?;
    if !json {
        println!("Run {} of {} submitted to {}", id, module, node);
    }

    let statuses = dispatcher.watch(id.clone(), Instant::now() + deadline);
    pin_mut!(statuses);
    loop {
        tokio::select! {
            next = statuses.next() => match next {
                Some(Ok(status)) => {
                    if !json {
                        println!("Status: {}", status);
                    }
                }
                Some(Err(e)) => return Err(e).with_context(|| format!("watching run {}", id)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling run {}", id);
                dispatcher.cancel(&id).await?;
                break;
            }
        }
    }

    let outcome = dispatcher.outcome(&id)?;
    print_outcome(&outcome, json)?;
    Ok(exit_for_run(&outcome))
}

fn print_outcome(outcome: &PollOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    match (&outcome.result, &outcome.failure) {
        (Some(result), _) => println!("{}", serde_json::to_string_pretty(result)?),
        (None, Some(failure)) => eprintln!("Run {} failed ({}): {}", outcome.run_id, failure.kind, failure.message),
        (None, None) => eprintln!("Run {} ended {}", outcome.run_id, outcome.status),
    }
    Ok(())
}

fn exit_for_run(outcome: &PollOutcome) -> Exit {
    match outcome.status {
        RunStatus::Completed => Exit::Success,
        RunStatus::TimedOut => Exit::TimedOut,
        _ => Exit::Failed,
    }
}

async fn run_plan(
    ctx: &AppContext,
    path: &Path,
    params: Params,
    workers: &[NodeAddress],
    environment_nodes: &[NodeAddress],
    deadline_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<Exit> {
    let mut plan = OrchestratorPlan::from_file(path)?;
    for step in &mut plan.steps {
        // Command-line inputs are defaults; the plan's own step params win.
        let mut merged = params.clone();
        for (key, value) in step.params.iter() {
            merged.insert(key.clone(), value.clone());
        }
        step.params = merged;
        if step.deadline_secs.is_none() {
            step.deadline_secs = deadline_secs;
        }
    }

    let mut nodes: Vec<&NodeAddress> = workers.iter().chain(environment_nodes).collect();
    nodes.sort();
    nodes.dedup();
    for node in nodes {
        ctx.ensure_user(node).await?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling plan");
            on_interrupt.cancel();
        }
    });

    info!("Executing plan {:?} on {} worker(s)", plan.name, workers.len());
    let report = ctx
        .coordinator()
        .execute_with_cancel(&plan, workers, environment_nodes, cancel)
        .await;
    interrupt.abort();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.aggregate())?);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if let Some(failure) = &report.failure {
        eprintln!("Plan {:?} failed: {}", report.plan, failure);
    }
    Ok(exit_for_plan(&report))
}

fn exit_for_plan(report: &PlanReport) -> Exit {
    match (&report.status, &report.failure) {
        (PlanStatus::Completed, _) => Exit::Success,
        (_, Some(failure)) if failure.kind == FailureKind::Timeout => Exit::TimedOut,
        _ => Exit::Failed,
    }
}
