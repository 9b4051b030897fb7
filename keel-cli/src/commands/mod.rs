//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod kill;
mod pipeline;
mod status;

pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Request termination of a pipeline on every node
    Kill {
        /// Pipeline ID
        pipeline_id: String,
    },
    /// List kill signals currently active on the node
    Kills,
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Show node and watcher status
    Status,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Kill { pipeline_id } => kill::request_kill(config, &pipeline_id).await,
        Commands::Kills => kill::list_active(config).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Status => status::show_status(config).await,
    }
}
