use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Manifest used when none is given
pub const DEFAULT_MANIFEST: &str = "converge.toml";

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Converge files on this machine to a declared state", long_about = None)]
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
    /// Run pending migrations, then make every declared file match
    Apply(ApplyArgs),

    /// Print the value of facts as templates would see them
    Facts(FactsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Manifest file (.toml or .json)
    #[arg(env = "CONVERGE_MANIFEST", default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Prefix of environment variables read as facts
    #[arg(long, env = "CONVERGE_FACT_PREFIX")]
    pub fact_prefix: Option<String>,

    /// Migration cursor file [default: $CONVERGE_STATE_DIR/versions.toml]
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

#[derive(Parser)]
pub struct FactsArgs {
    /// Facts to look up
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Manifest providing static facts
    #[arg(short, long, env = "CONVERGE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Prefix of environment variables read as facts
    #[arg(long, env = "CONVERGE_FACT_PREFIX")]
    pub fact_prefix: Option<String>,
}
