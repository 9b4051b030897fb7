//! Kill command handlers

use anyhow::Result;
use colored::*;

use crate::api::NodeClient;
use crate::config::Config;

/// Publish a kill signal
pub async fn request_kill(config: &Config, pipeline_id: &str) -> Result<()> {
    let client = NodeClient::new(&config.node_url);
    client.request_kill(pipeline_id).await?;

    println!(
        "{}",
        format!("✓ Kill requested for pipeline {}", pipeline_id)
            .green()
            .bold()
    );
    println!(
        "  {}",
        "The signal expires on its own; nodes act on it asynchronously.".dimmed()
    );

    Ok(())
}

/// List active kill signals
pub async fn list_active(config: &Config) -> Result<()> {
    let client = NodeClient::new(&config.node_url);
    let entries = client.list_active_kills().await?;

    if entries.is_empty() {
        println!("{}", "No active kill signals.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} active kill signal(s):", entries.len()).bold()
    );
    println!();
    for entry in entries {
        println!("  {} {}", "▸".red(), entry.pipeline_id.bold());
        println!("    Revision:  {}", entry.revision.to_string().dimmed());
        if let Some(requested_at) = entry.requested_at {
            println!(
                "    Requested: {}",
                requested_at
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed()
            );
        }
    }

    Ok(())
}
