mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{OutputMode, RunOptions};
use flowmux::config::EngineConfig;
use flowmux::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowmux")]
#[command(about = "Run directed-graph workflows with pluggable node executors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Working directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Write run logs under the config directory
    #[arg(long, global = true)]
    log: bool,

    /// How events and the final record are printed
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Console)]
    output: OutputMode,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph
    Run {
        /// Graph name or path
        graph: String,

        /// Workflow input as JSON
        #[arg(long)]
        input: Option<String>,

        /// Initial variable, as key=value (repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Workflow timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Retries for nodes without their own retry block
        #[arg(long)]
        max_retries: Option<u32>,

        /// Keep walking the graph past failed nodes
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Validate a graph without running it
    Validate {
        /// Graph name or path
        graph: String,
    },

    /// List node types with a registered executor
    Executors,

    /// List configured agents and tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Run { graph, .. }) if cli.log => Some(logging::default_log_path(graph)?),
        _ => None,
    };
    let quiet = cli.quiet || cli.output == OutputMode::Quiet;
    let _log_guard = logging::init_logging(cli.debug, quiet, log_file)?;

    let working_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = EngineConfig::load(Some(&working_dir))?;
    let handler = cli::create_handler(cli.output, cli.debug);

    let code = match cli.command {
        Commands::Run {
            graph,
            input,
            vars,
            timeout_ms,
            max_retries,
            continue_on_error,
        } => {
            let options = RunOptions {
                input: cli::parse_input(input.as_deref()).map_err(anyhow::Error::msg)?,
                variables: cli::parse_variables(&vars).map_err(anyhow::Error::msg)?,
                timeout_ms,
                max_retries,
                continue_on_error,
            };
            cli::run_graph(&graph, options, &working_dir, &config, handler).await?
        }

        Commands::Validate { graph } => cli::validate_graph(&graph, &working_dir, &*handler),

        Commands::Executors => cli::list_executors(&config, &*handler)?,

        Commands::Tools => cli::list_tools(&config, &*handler)?,
    };

    std::process::exit(code);
}
