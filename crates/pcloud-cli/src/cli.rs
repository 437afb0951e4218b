use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pcloud")]
#[command(about = "Inspect and maintain the personal cloud state of a local database")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether sync is enabled and what is waiting to be pushed
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable cloud sync for an install with nothing to migrate
    Enable,
    /// Queue every local object for upload, replacing queued actions
    PrepareMigration,
    /// Inspect or remove browsing history nobody cares about anymore
    PassiveData {
        #[command(subcommand)]
        command: PassiveDataCommands,
    },
    /// List queued actions
    Queue {
        /// Show actions that exhausted their attempts instead
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum PassiveDataCommands {
    /// Report whether old history is still stored
    Check,
    /// Remove pages without user data and trim long visit histories
    Clean {
        /// Visits kept per page
        #[arg(long, value_name = "N")]
        visit_limit: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
