use crate::connect::BackendKind;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use kmskit::{RetryConfig, WaitConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative provisioner for KMS keys", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Key service to talk to
    #[arg(long, value_enum, default_value_t = BackendKind::Local, global = true, env = "KEYWARD_BACKEND")]
    pub backend: BackendKind,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create keys, aliases and grants until the definitions are met
    Apply(ApplyArgs),

    /// Compare definitions with recorded state
    Status(StatusArgs),

    /// Show the recorded state of one key
    Show {
        /// Key name
        name: String,

        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a key id for a dependent resource
    Provide(ProvideArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply / Status
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Definitions file (default: <config dir>/keys.toml)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Only converge this key
    #[arg(short, long)]
    pub target: Option<String>,

    /// Poll every key until it is available, even ones already up
    #[arg(long)]
    pub check: bool,

    /// Show what would happen without contacting the key service
    #[arg(long, conflicts_with = "check")]
    pub plan: bool,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Definitions file (default: <config dir>/keys.toml)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Only show this key
    #[arg(short, long)]
    pub target: Option<String>,
}

// ============================================================================
// Provide
// ============================================================================

#[derive(Args)]
pub struct ProvideArgs {
    /// "new" for a fresh key, a key id, or empty for the default managed key
    #[arg(default_value = "")]
    pub key: String,

    /// Region of the key
    #[arg(short, long)]
    pub region: String,

    /// Accessor id (default: $EC2_ACCESS_KEY or $AWS_ACCESS_KEY_ID)
    #[arg(long)]
    pub access_key_id: Option<String>,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

// ============================================================================
// Retry / Wait Tuning
// ============================================================================

#[derive(Args, Clone)]
pub struct TuningArgs {
    /// Attempts per remote call before giving up on transient errors
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Seconds between availability polls
    #[arg(long, default_value_t = 2)]
    pub poll_interval: u64,

    /// Availability polls before giving up
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_polls: u32,
}

impl TuningArgs {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            ..RetryConfig::default()
        }
    }

    pub fn wait(&self) -> WaitConfig {
        WaitConfig::new(self.max_polls, Duration::from_secs(self.poll_interval))
    }
}
