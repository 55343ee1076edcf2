//! Cellbox CLI - run and check notebooks from the terminal.

mod analyze;
mod check;
mod colors;
mod notebook;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cellbox")]
#[command(about = "Notebook kernel sandbox: run, analyze and lint cell notebooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notebook headlessly
    Run {
        /// Path to the notebook (cells separated by `# %%` lines)
        notebook: String,

        /// Run only a specific cell (and the cells it reads from)
        #[arg(long)]
        cell: Option<String>,

        /// Run the sandbox in a separate cellbox-worker process
        #[arg(long)]
        isolated: bool,

        /// File of startup code run into the namespace before any cell
        #[arg(long)]
        startup: Option<String>,
    },

    /// Show the dependency graph between cells
    Analyze {
        /// Path to the notebook
        notebook: String,

        /// Also list the cells that re-run when this cell changes
        #[arg(long)]
        changed: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lint every cell of a notebook
    Check {
        /// Path to the notebook
        notebook: String,

        /// Print diagnostics as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format cellbox-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<cellbox_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            notebook,
            cell,
            isolated,
            startup,
        } => {
            let mut config = cellbox_core::SandboxConfig::from_env();
            if let Some(path) = startup {
                let code = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read startup file {path}: {e}"))?;
                config = config.with_startup(code);
            }
            run::execute(&notebook, cell.as_deref(), isolated, config)
                .await
                .map_err(format_error)?;
        }

        Commands::Analyze {
            notebook,
            changed,
            json,
        } => analyze::execute(&notebook, changed.as_deref(), json).map_err(format_error)?,

        Commands::Check { notebook, json } => check::execute(&notebook, json).map_err(format_error)?,
    }

    Ok(())
}
