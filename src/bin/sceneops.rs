//! sceneops command line.
//!
//! Runs scenes against the in-process simulated ledger and manages the
//! scenario data stored under `DATA_PATH`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use sceneops::config::ProcessEnv;
use sceneops::{execute_path, Config, ExecutionContext, MemoryLedger, OpsResult, ScenarioStore, ThrottledLedger};

/// Native balance given to every account of the simulated ledger.
const SIMULATED_BALANCE: u128 = 1_000_000_000_000_000_000_000;

/// Declarative scenes for blockchain automation
#[derive(Parser)]
#[command(name = "sceneops", version, about = "Declarative scenes for blockchain automation")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Manage scenario data
    Data {
        #[command(subcommand)]
        cmd: DataCmd,
    },
    /// Execute scene files or directories within a scenario
    Execute {
        /// Network to run on
        #[arg(short, long)]
        network: String,
        /// Scenario to run in; created if missing
        #[arg(short, long)]
        scenario: String,
        /// Delete the scenario before running
        #[arg(short, long)]
        clean: bool,
        /// Delete the scenario after a successful run
        #[arg(short, long)]
        delete: bool,
        /// Scene files or directories, run in order
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print every option visible from a network
    Dump {
        #[arg(short, long, default_value = "devnet")]
        network: String,
    },
}

#[derive(Subcommand)]
enum DataCmd {
    /// List the scenarios of a network
    List {
        #[arg(short, long)]
        network: String,
    },
    /// Print a scenario, or one value of it
    Get {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        scenario: String,
        /// Read from a checkpoint instead of the current state
        #[arg(long)]
        checkpoint: Option<String>,
        /// Path of the value to print
        path: Option<String>,
    },
    /// Delete a scenario with its checkpoints
    Delete {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        scenario: String,
    },
    /// Copy a scenario under a new name
    Clone {
        #[arg(short, long)]
        network: String,
        source: String,
        destination: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Manage checkpoints
    Checkpoint {
        #[command(subcommand)]
        cmd: CheckpointCmd,
    },
}

#[derive(Subcommand)]
enum CheckpointCmd {
    /// Snapshot the current state
    Create {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        scenario: String,
        checkpoint: String,
    },
    /// Replace the current state with a checkpoint
    Load {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        scenario: String,
        checkpoint: String,
    },
    /// Delete a checkpoint
    Delete {
        #[arg(short, long)]
        network: String,
        #[arg(short, long)]
        scenario: String,
        checkpoint: String,
    },
}

fn open(network: &str) -> OpsResult<(Config, ScenarioStore)> {
    let config = Config::discover(network, &ProcessEnv)?.validate()?;
    let store = ScenarioStore::from_config(&config)?;
    Ok((config, store))
}

fn print_json<T: serde::Serialize>(value: &T) -> OpsResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| sceneops::error::DataError::codec(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn run_config(cmd: ConfigCmd) -> OpsResult<()> {
    match cmd {
        ConfigCmd::Dump { network } => {
            let config = Config::discover(network, &ProcessEnv)?;
            for (option, value) in config.options() {
                println!("{option}={value}");
            }
            Ok(())
        }
    }
}

fn run_data(cmd: DataCmd) -> OpsResult<()> {
    match cmd {
        DataCmd::List { network } => {
            let (_, store) = open(&network)?;
            for name in store.list_scenarios()? {
                let checkpoints = store.list_checkpoints(&name)?;
                if checkpoints.is_empty() {
                    println!("{name}");
                } else {
                    println!("{name} (checkpoints: {})", checkpoints.join(", "));
                }
            }
            Ok(())
        }
        DataCmd::Get {
            network,
            scenario,
            checkpoint,
            path,
        } => {
            let (_, mut store) = open(&network)?;
            store.load(&scenario, checkpoint.as_deref())?;
            match path {
                Some(path) => print_json(&store.get_value(&path)?),
                None => print_json(store.scenario()?),
            }
        }
        DataCmd::Delete { network, scenario } => {
            let (_, mut store) = open(&network)?;
            store.delete_scenario(&scenario)?;
            info!("deleted scenario {scenario}");
            Ok(())
        }
        DataCmd::Clone {
            network,
            source,
            destination,
            overwrite,
        } => {
            let (_, store) = open(&network)?;
            store.clone_scenario(&source, &destination, overwrite)
        }
        DataCmd::Checkpoint { cmd } => run_checkpoint(cmd),
    }
}

fn run_checkpoint(cmd: CheckpointCmd) -> OpsResult<()> {
    match cmd {
        CheckpointCmd::Create {
            network,
            scenario,
            checkpoint,
        } => {
            let (_, mut store) = open(&network)?;
            store.load(&scenario, None)?;
            store.create_checkpoint(&checkpoint)
        }
        CheckpointCmd::Load {
            network,
            scenario,
            checkpoint,
        } => {
            let (_, mut store) = open(&network)?;
            store.load(&scenario, None)?;
            store.restore_checkpoint(&checkpoint)
        }
        CheckpointCmd::Delete {
            network,
            scenario,
            checkpoint,
        } => {
            let (_, store) = open(&network)?;
            store.delete_checkpoint(&scenario, &checkpoint)
        }
    }
}

fn run_execute(network: &str, scenario: &str, clean: bool, delete: bool, paths: &[PathBuf]) -> OpsResult<()> {
    let (config, mut store) = open(network)?;
    if clean && store.exists(scenario) {
        store.delete_scenario(scenario)?;
    }
    store.load_or_create(scenario)?;

    let ledger = MemoryLedger::new().with_initial_balance(SIMULATED_BALANCE);
    let gateway = Arc::new(ThrottledLedger::from_config(ledger, &config)?);
    let mut ctx = ExecutionContext::new(config, store, gateway)?;
    for path in paths {
        execute_path(&mut ctx, path)?;
    }

    let mut store = ctx.into_store();
    if delete {
        store.delete_scenario(scenario)?;
        info!("deleted scenario {scenario}");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.cmd {
        Cmd::Config { cmd } => run_config(cmd),
        Cmd::Data { cmd } => run_data(cmd),
        Cmd::Execute {
            network,
            scenario,
            clean,
            delete,
            paths,
        } => run_execute(&network, &scenario, clean, delete, &paths),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {}", e.root_cause());
            ExitCode::FAILURE
        }
    }
}
