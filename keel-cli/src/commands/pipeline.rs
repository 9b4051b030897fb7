//! Pipeline command handlers
//!
//! Handles publishing, rebinding, deleting and listing pipelines.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use keel_core::domain::pipeline::Pipeline;

use crate::api::NodeClient;
use crate::config::Config;
use crate::types::{BindNodes, ScheduledPipeline};

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create or replace a pipeline
    Put(PutArgs),
    /// Replace the nodes a pipeline is bound to
    Bind {
        /// Pipeline ID
        id: String,

        /// Node IDs (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        nodes: Vec<String>,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline ID
        id: String,
    },
    /// List pipelines known to the node
    List,
}

#[derive(Args, Debug, Default)]
pub struct PutArgs {
    /// JSON file holding the pipeline definition
    #[arg(short, long)]
    file: Option<String>,

    /// Pipeline ID (generated by the node when omitted)
    #[arg(long)]
    id: Option<String>,

    /// Pipeline name
    #[arg(short, long)]
    name: Option<String>,

    /// Pipeline description
    #[arg(short, long)]
    description: Option<String>,

    /// Task references, in order (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    tasks: Vec<String>,

    /// Node IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,
}

/// Handle pipeline commands
///
/// # Arguments
/// * `command` - The pipeline command to execute
/// * `config` - The CLI configuration
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = NodeClient::new(&config.node_url);

    match command {
        PipelineCommands::Put(args) => put_pipeline(&client, args).await,
        PipelineCommands::Bind { id, nodes } => bind_nodes(&client, id, nodes).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
        PipelineCommands::List => list_pipelines(&client).await,
    }
}

/// Builds the pipeline to publish, flags overriding the file
fn build_pipeline(args: PutArgs) -> Result<Pipeline> {
    let mut pipeline = match &args.file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read pipeline file: {}", path))?;
            Pipeline::from_slice(content.as_bytes())
                .with_context(|| format!("Failed to parse pipeline file: {}", path))?
        }
        None => Pipeline::new(""),
    };

    if let Some(id) = args.id {
        pipeline.id = id;
    }
    if let Some(name) = args.name {
        pipeline.name = name;
    }
    if args.description.is_some() {
        pipeline.description = args.description;
    }
    if !args.tasks.is_empty() {
        pipeline.tasks = args.tasks;
    }
    if !args.nodes.is_empty() {
        pipeline.nodes = args.nodes;
    }

    Ok(pipeline)
}

async fn put_pipeline(client: &NodeClient, args: PutArgs) -> Result<()> {
    let pipeline = build_pipeline(args)?;
    let published = client.publish_pipeline(&pipeline).await?;

    println!("{}", "✓ Pipeline published successfully!".green().bold());
    print_pipeline_details(&published.pipeline);
    println!("  Revision:    {}", published.revision.to_string().dimmed());

    Ok(())
}

async fn bind_nodes(client: &NodeClient, id: String, nodes: Vec<String>) -> Result<()> {
    let published = client
        .bind_nodes(&BindNodes {
            pipeline_id: id,
            nodes,
        })
        .await?;

    println!("{}", "✓ Pipeline rebound successfully!".green().bold());
    print_pipeline_details(&published.pipeline);

    Ok(())
}

async fn delete_pipeline(client: &NodeClient, id: &str) -> Result<()> {
    client.retract_pipeline(id).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", id)
            .green()
            .bold()
    );

    Ok(())
}

async fn list_pipelines(client: &NodeClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} pipeline(s):", pipelines.len()).bold()
        );
        println!();
        for pipeline in pipelines {
            print_pipeline_summary(&pipeline);
        }
    }

    Ok(())
}

/// Print a pipeline summary
fn print_pipeline_summary(scheduled: &ScheduledPipeline) {
    let pipeline = &scheduled.pipeline;
    let name = if pipeline.name.is_empty() {
        pipeline.id.as_str()
    } else {
        pipeline.name.as_str()
    };

    println!("  {} {}", "▸".cyan(), name.bold());
    println!("    ID:      {}", pipeline.id.dimmed());
    println!(
        "    Bound:   {}",
        if scheduled.bound {
            "yes".green()
        } else {
            "no".dimmed()
        }
    );
    if !pipeline.nodes.is_empty() {
        println!("    Nodes:   {}", pipeline.nodes.join(", ").dimmed());
    }
    if let Some(requested_at) = scheduled.kill_requested_at {
        println!(
            "    Kill:    {}",
            requested_at.format("%Y-%m-%d %H:%M:%S").to_string().red()
        );
    }
    println!(
        "    Updated: {}",
        scheduled
            .updated_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed pipeline information
fn print_pipeline_details(pipeline: &Pipeline) {
    println!("  ID:          {}", pipeline.id.cyan());
    if !pipeline.name.is_empty() {
        println!("  Name:        {}", pipeline.name.bold());
    }
    if let Some(desc) = &pipeline.description {
        println!("  Description: {}", desc);
    }
    if !pipeline.tasks.is_empty() {
        println!("  Tasks:       {}", pipeline.tasks.join(" → "));
    }
    println!("  Nodes:       {}", pipeline.nodes.join(", "));
}
