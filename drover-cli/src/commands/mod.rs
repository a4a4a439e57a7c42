//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod plan;
mod resolve;
mod run;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use drover_core::TaskStatus;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build the stage graph of a workflow run without executing it
    Plan {
        /// Path to the workflow run request (JSON)
        request: String,

        /// Path to the catalog the run is compiled against (JSON)
        #[arg(short, long, env = "DROVER_CATALOG")]
        catalog: String,

        /// Creator recorded on the task
        #[arg(long, default_value = "cli")]
        creator: String,

        /// Print the task document instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Execute a task document against the configured cluster
    Run {
        /// Path to the task document (JSON)
        task: String,

        /// Helm environments of the task (JSON list)
        #[arg(long, env = "DROVER_RENDER_SETS")]
        render_sets: Option<String>,

        /// Write the finished task document here
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Print the values fragment that points a chart at an image
    ResolveImage {
        /// Image URL, e.g. registry.io/team/app:1.0
        url: String,

        /// Image component paths as component=path (repo, image or tag)
        #[arg(short, long = "path", value_parser = parse_key_val)]
        paths: Vec<(String, String)>,
    },
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Colors a status the way every command prints it
fn colored_status(status: TaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Passed => text.green(),
        TaskStatus::Running => text.cyan(),
        TaskStatus::Created => text.dimmed(),
        TaskStatus::Cancelled => text.yellow(),
        TaskStatus::Failed | TaskStatus::Timeout => text.red(),
    }
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Plan {
            request,
            catalog,
            creator,
            json,
        } => plan::plan_task(&request, &catalog, &creator, json).await,
        Commands::Run {
            task,
            render_sets,
            output,
        } => run::run_task(&task, render_sets.as_deref(), output.as_deref()).await,
        Commands::ResolveImage { url, paths } => resolve::resolve_image(&url, &paths),
    }
}
