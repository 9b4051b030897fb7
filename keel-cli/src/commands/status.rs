//! Status command handler

use anyhow::Result;
use colored::*;

use crate::api::NodeClient;
use crate::config::Config;
use crate::types::WatcherStatus;

/// Show node and watcher status
pub async fn show_status(config: &Config) -> Result<()> {
    let client = NodeClient::new(&config.node_url);
    let report = client.health().await?;

    let health = if report.healthy {
        "healthy".green()
    } else {
        "degraded".red()
    };
    println!("{} {} ({})", "Node".bold(), report.node_id.cyan(), health);
    println!();

    for watcher in &report.watchers {
        print_watcher(watcher);
    }

    Ok(())
}

fn print_watcher(watcher: &WatcherStatus) {
    println!("  {} {}", "▸".cyan(), watcher.name.bold());
    println!("    Phase:      {}", colorize_phase(&watcher.phase));
    println!("    Revision:   {}", watcher.revision);
    println!("    Events:     {}", watcher.events_emitted);
    println!("    Reconnects: {}", watcher.reconnects);
    println!(
        "    Updated:    {}",
        watcher
            .updated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(error) = &watcher.last_error {
        println!("    Last error: {}", error.red());
    }
    println!();
}

/// Colorize watcher phase for display
fn colorize_phase(phase: &str) -> ColoredString {
    match phase {
        "streaming" => phase.green(),
        "failed" => phase.red(),
        "stopped" => phase.dimmed(),
        _ => phase.yellow(),
    }
}
