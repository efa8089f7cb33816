//! The `kiln` command-line tool.
//!
//! Provides subcommands for simulating a design on any backend (`kiln sim`),
//! flattening its hierarchy (`kiln flatten`), lowering it to Verilog or FIRRTL
//! (`kiln export`), and summarizing its structure (`kiln info`). Designs are
//! read from the JSON form produced by [`kiln_ir::Design::to_json`].

#![warn(missing_docs)]

mod export;
mod flatten;
mod info;
mod pipeline;
mod sim;

use std::process;

use clap::{Parser, Subcommand};
use kiln_export::ExportFormat;
use kiln_sim::BackendKind;

/// kiln: cycle-based simulation and export for hardware netlists.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Cycle-based HDL simulation toolchain")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `kiln.toml` (default: `./kiln.toml` when present).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate a design for a number of cycles.
    Sim(SimArgs),
    /// Write the flattened, instance-free design as JSON.
    Flatten(FlattenArgs),
    /// Lower a design to Verilog or FIRRTL text.
    Export(ExportArgs),
    /// Print module, signal, register, and memory counts.
    Info(InfoArgs),
}

/// Arguments for `kiln sim`.
#[derive(Parser, Debug)]
pub struct SimArgs {
    /// Design JSON file.
    pub design: String,

    /// Backend to run (default from config).
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Fail instead of falling back to a slower backend.
    #[arg(long)]
    pub no_fallback: bool,

    /// Number of clock cycles to run (default from config).
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Drive an input before the run, as `name=value` (`0x`/`0b` accepted).
    #[arg(long, value_name = "NAME=VALUE")]
    pub poke: Vec<String>,

    /// Print a signal's value after the run.
    #[arg(long, value_name = "NAME")]
    pub peek: Vec<String>,

    /// Write a VCD waveform to this path.
    #[arg(long)]
    pub vcd: Option<String>,

    /// Hold `rst` high for one cycle before the run.
    #[arg(long)]
    pub reset: bool,
}

/// Arguments for `kiln flatten`.
#[derive(Parser, Debug)]
pub struct FlattenArgs {
    /// Design JSON file.
    pub design: String,

    /// Output path (default: stdout).
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for `kiln export`.
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Design JSON file.
    pub design: String,

    /// Output format (default from config).
    #[arg(long)]
    pub format: Option<ExportFormat>,

    /// Output path (default: stdout).
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for `kiln info`.
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Design JSON file.
    pub design: String,
}

/// Global options shared across all subcommands.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable debug logging.
    pub verbose: bool,
    /// Explicit config file path.
    pub config: Option<String>,
}

/// Log filter for the chosen verbosity, overridable through `KILN_LOG`.
fn log_filter(global: &GlobalArgs) -> tracing_subscriber::EnvFilter {
    let level = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "info"
    };
    match std::env::var("KILN_LOG") {
        Ok(filter) if !global.quiet && !global.verbose => tracing_subscriber::EnvFilter::new(filter),
        _ => tracing_subscriber::EnvFilter::new(level),
    }
}

fn main() {
    let cli = Cli::parse();
    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&global))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Sim(ref args) => sim::run(args, &global),
        Command::Flatten(ref args) => flatten::run(args, &global),
        Command::Export(ref args) => export::run(args, &global),
        Command::Info(ref args) => info::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
