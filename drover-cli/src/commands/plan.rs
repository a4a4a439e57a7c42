//! Plan command
//!
//! Compiles a workflow run request against a catalog and prints the
//! resulting stages.

use anyhow::{Context, Result};
use colored::*;
use drover_core::domain::task::Task;
use drover_graph::{GraphBuilder, InMemoryCatalog, SchedulerContext, WorkflowTaskArgs};

use super::colored_status;

pub async fn plan_task(request_path: &str, catalog_path: &str, creator: &str, json: bool) -> Result<()> {
    let request = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request file: {}", request_path))?;
    let args: WorkflowTaskArgs =
        serde_json::from_str(&request).context("Failed to parse workflow run request")?;

    let catalog = std::fs::read_to_string(catalog_path)
        .with_context(|| format!("Failed to read catalog file: {}", catalog_path))?;
    let catalog = InMemoryCatalog::from_json(&catalog).context("Failed to parse catalog")?;

    let scheduler = SchedulerContext::new();
    let created = GraphBuilder::new(&catalog, &scheduler)
        .create_workflow_task(&args, creator)
        .await
        .context("Failed to create workflow task")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&created.task)?);
    } else {
        print_plan(&created.task);
    }
    Ok(())
}

fn print_plan(task: &Task) {
    println!(
        "{} {}#{}",
        "✓ Task planned:".green().bold(),
        task.pipeline_name.bold(),
        task.task_id
    );
    if !task.namespace.is_empty() {
        println!("  Namespace: {}", task.namespace.cyan());
    }
    println!("  Stages:    {}", task.stages.len().to_string().dimmed());
    println!();
    for stage in &task.stages {
        let mode = if stage.run_parallel { "parallel" } else { "sequential" };
        println!("{} {}", stage.kind.to_string().bold(), format!("({})", mode).dimmed());
        for (key, sub) in &stage.sub_tasks {
            let enabled = if sub.is_enabled() { "" } else { " disabled" };
            println!(
                "  - {} {}{}",
                key.cyan(),
                colored_status(sub.status()),
                enabled.yellow()
            );
        }
    }
}
