use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};
use wireflow::config::Settings;
use wireflow::inventory::{EmptyInventory, InventoryProvider, YamlInventory};
use wireflow::registry::{FilterRegistry, TaskRegistry};
use wireflow::workflow::WorkflowAssembler;

/// Workflow orchestration for network automation
#[derive(Parser)]
#[command(name = "wireflow")]
#[command(about = "Assemble and inspect network automation workflows", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the settings file (default: wireflow.yaml)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a workflow's blueprints and print the literal task list
    Expand {
        /// Path to the workflow file
        workflow: PathBuf,

        /// CLI variables as key=value pairs (highest assembly precedence)
        #[arg(long = "vars", value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },
    /// Show resolved state: settings, blueprint catalog, or host variables
    Show {
        #[command(subcommand)]
        what: ShowCommands,
    },
}

#[derive(Subcommand)]
enum ShowCommands {
    /// Show the resolved settings
    Settings,
    /// Show the discovered blueprint catalog
    Blueprints,
    /// Show the effective, precedence-resolved variables for a host
    Vars {
        /// Host name to resolve variables for
        #[arg(long)]
        host: String,

        /// Workflow supplying the inline/paired/domain tiers
        #[arg(long)]
        workflow: Option<PathBuf>,

        /// CLI variables as key=value pairs
        #[arg(long = "vars", value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },
}

/// Parses a `key=value` pair; the value is YAML-interpreted so numbers and
/// booleans come through typed.
fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid variable '{s}', expected key=value"))?;
    let value: Value =
        serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
    debug!("wireflow started with verbosity level: {}", cli.verbose);

    let result = run(cli).await;
    if let Err(e) = result {
        error!("fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Expand { workflow, vars } => {
            let assembler = WorkflowAssembler::new(
                settings,
                TaskRegistry::with_builtins(),
                FilterRegistry::with_builtins(),
            );
            let (definition, tasks, _) = assembler
                .expand(&workflow, vars.into_iter().collect())
                .await
                .with_context(|| format!("failed to expand {}", workflow.display()))?;

            println!("# workflow: {}", definition.name);
            print!("{}", serde_yaml::to_string(&tasks)?);
        }
        Commands::Show { what } => match what {
            ShowCommands::Settings => {
                print!("{}", serde_yaml::to_string(&settings)?);
            }
            ShowCommands::Blueprints => {
                let assembler = WorkflowAssembler::new(
                    settings,
                    TaskRegistry::with_builtins(),
                    FilterRegistry::with_builtins(),
                );
                for (name, path) in assembler.catalog().iter() {
                    println!("{name}: {}", path.display());
                }
            }
            ShowCommands::Vars {
                host,
                workflow,
                vars,
            } => {
                show_vars(settings, host, workflow, vars.into_iter().collect()).await?;
            }
        },
    }

    Ok(())
}

async fn show_vars(
    settings: Settings,
    host: String,
    workflow: Option<PathBuf>,
    cli_vars: HashMap<String, Value>,
) -> anyhow::Result<()> {
    let inventory: Arc<dyn InventoryProvider> = match &settings.inventory_file {
        Some(path) => Arc::new(
            YamlInventory::load(path)
                .with_context(|| format!("failed to load inventory {}", path.display()))?,
        ),
        None => Arc::new(EmptyInventory),
    };

    let assembler = WorkflowAssembler::new(
        settings,
        TaskRegistry::with_builtins(),
        FilterRegistry::with_builtins(),
    );

    let flat = match workflow {
        Some(path) => {
            let (_, _, tiers) = assembler
                .expand(&path, cli_vars)
                .await
                .with_context(|| format!("failed to load {}", path.display()))?;
            let resolver = wireflow::vars::VariableResolver::new(tiers, inventory);
            resolver.effective_variables(&host)
        }
        None => {
            let defaults_path = assembler
                .settings()
                .vars_dir
                .join(wireflow::config::DEFAULTS_FILENAME);
            let tiers = wireflow::vars::TierSnapshots {
                cli: cli_vars,
                global_default: wireflow::config::load_vars_file(&defaults_path)?,
                environment: wireflow::vars::load_env_vars(),
                ..Default::default()
            };
            let resolver = wireflow::vars::VariableResolver::new(tiers, inventory);
            resolver.effective_variables(&host)
        }
    };

    if flat.is_empty() {
        println!("# no variables resolved for host '{host}'");
    } else {
        print!("{}", serde_yaml::to_string(&flat)?);
    }
    Ok(())
}
