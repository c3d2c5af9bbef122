//! CLI entrypoint for the atsalloc workload harness.

use std::path::PathBuf;

use atsalloc_core::config::parse_byte_size;
use atsalloc_core::{FreeRouting, RouterConfig};
use atsalloc_harness::{HarnessError, WorkloadSpec, run_workload};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Drive the threshold-routed device/host allocator.
#[derive(Debug, Parser)]
#[command(name = "atsalloc-harness")]
#[command(about = "Workload harness for the atsalloc device/host router")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run concurrent allocate/free traffic and print the final stats as JSON.
    Run {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 1_000)]
        cycles: usize,
        /// Comma-separated request sizes (suffixes K/M/G accepted).
        #[arg(long, value_delimiter = ',', value_parser = byte_size, default_value = "64,512,4K,64K,1M")]
        sizes: Vec<usize>,
        /// Live blocks per thread before the oldest is freed.
        #[arg(long, default_value_t = 8)]
        hold: usize,
        /// Device/host split point; 0 sends everything to the host.
        #[arg(long, value_parser = byte_size, default_value = "64K")]
        threshold: usize,
        /// Cap on simulated device memory.
        #[arg(long, value_parser = byte_size)]
        device_capacity: Option<usize>,
        /// `probe` or `tagged`.
        #[arg(long, default_value = "probe")]
        free_routing: String,
        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the router configuration resolved from ATSALLOC_* environment variables.
    Config,
}

fn byte_size(raw: &str) -> Result<usize, String> {
    parse_byte_size(raw).ok_or_else(|| format!("invalid byte size: {raw}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();

    if let Err(err) = run(Cli::parse()) {
        tracing::error!(%err, "harness failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), HarnessError> {
    match cli.command {
        Command::Run {
            threads,
            cycles,
            sizes,
            hold,
            threshold,
            device_capacity,
            free_routing,
            output,
        } => {
            let spec = WorkloadSpec {
                threads,
                cycles_per_thread: cycles,
                sizes,
                hold,
                threshold,
                device_capacity,
                free_routing: FreeRouting::from_str_loose(&free_routing),
            };
            let report = run_workload(&spec)?;
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(path = %path.display(), "report written");
                }
                None => println!("{json}"),
            }
        }
        Command::Config => {
            let config = RouterConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
