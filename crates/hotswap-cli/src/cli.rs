//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand};
use hotswap_runtime::FailurePolicy;
use std::path::PathBuf;

/// Hotswap - load native modules and reload them while the host keeps running
#[derive(Parser)]
#[command(name = "hotswap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Load modules and reload them whenever their binaries change
    Run(RunArgs),

    /// Show the binary a module name resolves to
    Locate {
        /// Logical module name
        name: String,

        /// Directory holding module binaries
        #[arg(short, long, default_value = ".")]
        source_dir: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Host configuration file (toml, yaml, json, ini, ron, json5)
    #[arg(short, long, env = "HOTSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding module binaries
    #[arg(short, long)]
    pub source_dir: Option<PathBuf>,

    /// Directory for staged copies (temporary when omitted)
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Milliseconds between reload passes
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// What a failed reload does with the module
    #[arg(short, long)]
    pub policy: Option<FailurePolicy>,

    /// Skip reloads when the binary's bytes did not change
    #[arg(long)]
    pub skip_unchanged: bool,

    /// Poll modification times instead of watching the directory
    #[arg(long)]
    pub poll: bool,

    /// Load, run one reload pass, tear down and exit
    #[arg(long)]
    pub once: bool,

    /// Modules to load, in addition to those in the config file
    pub modules: Vec<String>,
}
