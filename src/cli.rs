use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "buddy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Launch experiments on SSH hosts, SLURM clusters, cloud VMs and docker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Snapshot the code and launch jobs or sweep agents on a target
    Deploy(DeployArgs),

    /// Connect to a host and report its job-management backend
    Detect {
        /// Host (ssh://host or bare host)
        target: String,

        /// Project directory whose buddy_scripts override would be used
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Check local tools, credentials and configuration
    Doctor,

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Deploy
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Target: host, ssh://host, hetzner://<type>, aws://<type>, docker://[context]
    pub target: String,

    /// Script to run, relative to the current directory
    pub entrypoint: Option<PathBuf>,

    /// Experiment id (asked interactively when missing)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Sweep id or YAML sweep definition; launches sweep agents
    #[arg(short, long)]
    pub sweep: Option<String>,

    /// Tracker entity for newly registered sweeps
    #[arg(long)]
    pub entity: Option<String>,

    /// Number of jobs (or sweep agents) to launch
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub jobs: u32,

    /// Concurrent launches (defaults to the configured parallelism)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub parallel: Option<u32>,

    /// Environment module to load; repeat for several (replaces the configured list)
    #[arg(short, long = "module")]
    pub modules: Vec<String>,

    /// Environment (conda env) name
    #[arg(short, long)]
    pub env: Option<String>,

    /// Extra scheduler directives inserted after the #SBATCH header
    #[arg(long)]
    pub extra_header: Option<String>,

    /// Git remote the snapshot is pushed to
    #[arg(long)]
    pub remote: Option<String>,

    /// Launch one job at a time on a single connection
    #[arg(long)]
    pub sequential: bool,

    /// Show what would be done without snapshotting or connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Repository directory
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a config file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
