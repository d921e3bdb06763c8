//! scan-input
//!
//! Prepares the input file for one scan task and prints its path, or expands an
//! auxiliary database archive.
//!
//! ## Commands
//!
//! - **prepare**: read a task descriptor, download/verify or reconstruct the input
//! - **extract**: expand a gzip tarball from a URL or local file into a directory

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use scanprep_input::{write_output, Config, InputPreparer, TaskDescriptor, ToolOutput};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Scan input preparation.
#[derive(Debug, Parser)]
#[command(name = "scan-input")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prepare the local input for a task and print its path.
    Prepare {
        /// Task descriptor (JSON).
        #[arg(long)]
        input: PathBuf,

        /// Where to write a FAILED tool output if preparation fails.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Expand a gzip tarball into a directory.
    #[command(group(ArgGroup::new("source").required(true).args(["url", "file"])))]
    Extract {
        /// Archive URL.
        #[arg(long)]
        url: Option<String>,

        /// Local archive path.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Destination directory.
        #[arg(long)]
        dest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to SCANPREP_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(
        work_dir = %config.work_dir.display(),
        max_retries = config.max_retries,
        download_timeout_secs = config.download_timeout.map(|d| d.as_secs()),
        "Configuration loaded"
    );

    let preparer = InputPreparer::from_config(config)?;

    let cancel = preparer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling downloads");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Prepare { input, output } => prepare(&preparer, &input, output.as_deref()).await,
        Command::Extract { url, file, dest } => {
            let summary = match (url, file) {
                (Some(url), _) => preparer.extract_archive(&url, &dest).await?,
                (None, Some(file)) => preparer.extract_local(&file, &dest).await?,
                (None, None) => anyhow::bail!("either --url or --file is required"),
            };
            info!(
                dest = %dest.display(),
                directories = summary.directories,
                files = summary.files,
                "Extraction complete"
            );
            Ok(())
        }
    }
}

async fn prepare(preparer: &InputPreparer, input: &Path, output: Option<&Path>) -> Result<()> {
    let body = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read task descriptor {}", input.display()))?;
    let task = TaskDescriptor::from_slice(&body)?;

    match preparer.prepare(&task).await {
        Ok(prepared) => {
            println!("{}", prepared.path.display());
            Ok(())
        }
        Err(e) => {
            error!(task_id = %task.task_id, error = %e, "Failed to prepare input");
            if let Some(path) = output {
                let failed = ToolOutput::failed(format!("Generate input file failed: {e}"))
                    .for_task(task.task_id.clone());
                write_output(path, &failed).await?;
            }
            Err(e.into())
        }
    }
}
