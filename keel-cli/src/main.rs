//! Keel CLI
//!
//! Command-line interface for operating a Keel node.

mod api;
mod commands;
mod config;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel node control plane CLI", long_about = None)]
struct Cli {
    /// Node API URL
    #[arg(long, env = "KEEL_NODE_URL", default_value = "http://localhost:8090")]
    node_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        node_url: cli.node_url,
    };

    handle_command(cli.command, &config).await
}
