//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "naptha", version, about = "Run agents, orchestrators and environments on Naptha nodes")]
pub struct Cli {
    /// Local state directory (identity key, run cache, downloaded files).
    #[arg(long, global = true, env = "NAPTHA_HOME", default_value = ".naptha")]
    pub data_dir: PathBuf,

    /// Default worker node; overrides NODE_URL.
    #[arg(long, global = true)]
    pub node: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List nodes registered with the hub.
    Nodes,
    /// List, show, register or delete agents.
    Agents(RegistryArgs),
    /// List, show, register or delete orchestrators.
    Orchestrators(RegistryArgs),
    /// List, show, register or delete environments.
    Environments(RegistryArgs),
    /// List, show, register or delete personas.
    Personas(RegistryArgs),
    /// Run a module and wait for its result.
    Run(RunArgs),
    /// Download a stored object.
    ReadStorage {
        id: String,
        /// Output directory; defaults to the state directory's files/.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Upload a file or every file under a directory.
    WriteStorage {
        path: PathBuf,
        /// Address objects by their sha256 digest.
        #[arg(long)]
        content_addressed: bool,
    },
    /// Show recent runs from the local cache.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Create a hub account for HUB_USER bound to the local identity.
    Signup,
}

#[derive(Args, Debug)]
pub struct RegistryArgs {
    /// Module name; lists all modules of this kind when omitted.
    pub name: Option<String>,

    /// Registration fields as `key=value` pairs (description, url, type, version).
    #[arg(short, long)]
    pub parameters: Option<String>,

    /// Delete the named module.
    #[arg(short, long, requires = "name")]
    pub delete: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Module to run, e.g. `hello_world` or `orchestrator:debate@0.2.0`.
    pub module: String,

    /// Inputs as a JSON object or `key=value` pairs.
    #[arg(short, long, conflicts_with = "file")]
    pub parameters: Option<String>,

    /// Inputs from a YAML or JSON file.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Comma-separated worker node URLs.
    #[arg(short = 'n', long)]
    pub worker_nodes: Option<String>,

    /// Comma-separated environment node URLs.
    #[arg(short = 'e', long)]
    pub environment_nodes: Option<String>,

    /// Comma-separated persona URLs handed to an agent run.
    #[arg(short = 'u', long)]
    pub personas_urls: Option<String>,

    /// Orchestrator plan to drive locally across the worker nodes.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Deadline for each run, in seconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Print the final result as JSON only.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "naptha",
            "run",
            "agent:hello_world",
            "-p",
            "firstname=sam surname=altman",
            "-n",
            "http://a:7001,http://b:7001",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.module, "agent:hello_world");
                assert_eq!(args.parameters.as_deref(), Some("firstname=sam surname=altman"));
                assert!(args.file.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_with_personas() {
        let cli = Cli::try_parse_from([
            "naptha",
            "run",
            "agent:debater",
            "-u",
            "https://hf.co/p1,https://hf.co/p2",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.personas_urls.as_deref(), Some("https://hf.co/p1,https://hf.co/p2"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parameters_conflict_with_file() {
        let err = Cli::try_parse_from(["naptha", "run", "x", "-p", "a=1", "-f", "p.yaml"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_registry_delete_requires_name() {
        assert!(Cli::try_parse_from(["naptha", "agents", "-d"]).is_err());
        let cli = Cli::try_parse_from(["naptha", "personas", "sage", "-d"]).unwrap();
        match cli.command {
            Command::Personas(args) => {
                assert_eq!(args.name.as_deref(), Some("sage"));
                assert!(args.delete);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
