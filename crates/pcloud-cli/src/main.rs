//! pcloud CLI - Inspect and maintain the personal cloud state of a device
//!
//! Works directly on the local database file, without a signed-in user.
//! Queued actions stay in the database until the app pushes them.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, PassiveDataCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::passive_data::{run_passive_data_check, run_passive_data_clean};
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::{run_enable, run_prepare_migration};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pcloud=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Enable => run_enable(&db_path).await?,
        Commands::PrepareMigration => run_prepare_migration(&db_path).await?,
        Commands::PassiveData { command } => match command {
            PassiveDataCommands::Check => run_passive_data_check(&db_path).await?,
            PassiveDataCommands::Clean { visit_limit } => {
                run_passive_data_clean(visit_limit, &db_path).await?;
            }
        },
        Commands::Queue { failed, json } => run_queue(failed, json, &db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
