use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qdb_cli::commands;
use qdb_cli::output::{OutputFormat, print_error};

#[derive(Parser, Debug)]
#[command(name = "qdb")]
#[command(version)]
#[command(about = "Deferred-execution query pipeline")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "human")]
    output: OutputFormat,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true, env = "QDB_LOG")]
    log: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a workload file and print each job's result
    Run {
        /// Path to the workload YAML file
        workload: PathBuf,

        /// Give up waiting for a job after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Plan every job in a workload file without executing it
    Plan {
        /// Path to the workload YAML file
        workload: PathBuf,
    },

    /// Print the default pipeline configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            workload,
            timeout_ms,
        } => commands::run(&workload, cli.output, timeout_ms.map(Duration::from_millis)).await,
        Commands::Plan { workload } => commands::plan(&workload, cli.output),
        Commands::Config => commands::config(),
    }
}
