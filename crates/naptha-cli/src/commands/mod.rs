//! Subcommand handlers.

mod registry;
mod run;
mod runs;
mod storage;

use std::process::ExitCode;

use naptha_core::ModuleType;

use crate::cli::Command;
use crate::context::AppContext;

/// How a command finished, mapped onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failed,
    TimedOut,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => ExitCode::SUCCESS,
            Exit::Failed => ExitCode::from(1),
            Exit::TimedOut => ExitCode::from(2),
        }
    }
}

pub async fn dispatch(ctx: &AppContext, command: Command) -> anyhow::Result<Exit> {
    match command {
        Command::Agents(args) => registry::modules(ctx, ModuleType::Agent, &args).await?,
        Command::Orchestrators(args) => {
            registry::modules(ctx, ModuleType::Orchestrator, &args).await?
        }
        Command::Environments(args) => {
            registry::modules(ctx, ModuleType::Environment, &args).await?
        }
        Command::Personas(args) => registry::modules(ctx, ModuleType::Persona, &args).await?,
        Command::Nodes => registry::nodes(ctx).await?,
        Command::Signup => registry::signup(ctx).await?,
        Command::Run(args) => return run::run(ctx, args).await,
        Command::ReadStorage { id, output_dir } => {
            storage::read(ctx, &id, output_dir).await?
        }
        Command::WriteStorage {
            path,
            content_addressed,
        } => storage::write(ctx, &path, content_addressed).await?,
        Command::Runs { limit } => runs::list(ctx, limit),
    }
    Ok(Exit::Success)
}
