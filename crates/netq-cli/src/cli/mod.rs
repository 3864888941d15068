//! CLI for the netq request queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use netq_core::config;
use std::path::PathBuf;

use commands::{run_fetch, run_probe, FetchOptions};

/// Top-level CLI for netq.
#[derive(Debug, Parser)]
#[command(name = "netq")]
#[command(about = "netq: run HTTP requests through a bounded-concurrency queue", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs through the queue.
    Fetch {
        /// HTTP/HTTPS URLs to download, started in the order given.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Run at most N requests at once (0 = unbounded). Defaults to the config value.
        #[arg(short = 'c', long, value_name = "N")]
        max_concurrent: Option<usize>,

        /// Probe every size with HEAD before starting so the overall percentage is exact.
        #[arg(long)]
        accurate_progress: bool,

        /// Keep running the other requests when one fails.
        #[arg(long)]
        keep_going: bool,

        /// Directory to save files into (default: current directory).
        #[arg(short = 'o', long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Print the size and metadata a server reports for a URL (HEAD).
    Probe {
        /// HTTP/HTTPS URL to probe.
        url: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                urls,
                max_concurrent,
                accurate_progress,
                keep_going,
                output_dir,
            } => {
                let output_dir = match output_dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let opts = FetchOptions {
                    urls,
                    max_concurrent,
                    accurate_progress,
                    keep_going,
                    output_dir,
                };
                run_fetch(&cfg, opts).await?;
            }
            CliCommand::Probe { url } => run_probe(&cfg, &url).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
