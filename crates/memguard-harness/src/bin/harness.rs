//! CLI entrypoint for the memguard diagnostics harness.

use clap::{Parser, Subcommand};

use memguard_harness::{BootstrapReport, SelftestReport, run_selftest};

/// Diagnostics for the memguard interception layer.
#[derive(Debug, Parser)]
#[command(name = "memguard-harness")]
#[command(about = "Inspect and self-test memguard's resolved primitives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved real-symbol table.
    Bindings {
        /// Emit JSON instead of markdown.
        #[arg(long)]
        json: bool,
    },
    /// Run every exported dispatch function against its genuine binding.
    Selftest {
        /// Emit JSON instead of markdown.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective `MEMGUARD_OPTIONS` configuration.
    Options,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // `verbosity` asks for the resolved table at info level.
    let default_filter = if memguard_abi::env::options_from_environ().verbosity >= 1 {
        "warn,memguard=info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    let cli = Cli::parse();

    let interceptors = memguard_abi::try_bootstrap()?;
    log::debug!(target: "memguard", "bootstrap complete via {}", interceptors.table().strategy());

    match cli.command {
        Command::Bindings { json } => {
            let report = BootstrapReport::from_interceptors(interceptors);
            if json {
                println!("{}", report.to_json());
            } else {
                print!("{}", report.to_markdown());
            }
        }
        Command::Selftest { json } => {
            let report = SelftestReport::from_results(run_selftest(interceptors));
            if json {
                println!("{}", report.to_json());
            } else {
                print!("{}", report.to_markdown());
            }
            eprintln!(
                "Selftest complete: total={}, passed={}, failed={}",
                report.total, report.passed, report.failed
            );
            if !report.all_passed() {
                return Err("memguard selftest failed".into());
            }
        }
        Command::Options => {
            println!("{}", serde_json::to_string_pretty(interceptors.options())?);
        }
    }

    Ok(())
}
