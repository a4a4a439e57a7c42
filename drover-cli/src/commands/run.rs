//! Run command
//!
//! Executes a task document with the runtime configured from `DROVER_*`
//! environment variables. Ctrl-C cancels the run; running subtasks clean up
//! their jobs before the command returns.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_core::TaskStatus;
use drover_core::domain::task::Task;
use drover_kube::KubeClient;
use drover_runtime::helm::{CliHelmClient, EnvironmentRender, InMemoryRenderSets};
use drover_runtime::job::JobManager;
use drover_runtime::storage::HttpObjectStore;
use drover_runtime::{Clock, PluginContext, PluginRegistry, RuntimeConfig, StageExecutor, SystemClock};

use super::colored_status;

fn load_render_sets(path: Option<&str>) -> Result<Vec<EnvironmentRender>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read render sets file: {}", path))?;
    serde_json::from_str(&content).context("Failed to parse render sets")
}

fn plugin_context(config: RuntimeConfig, environments: Vec<EnvironmentRender>) -> PluginContext {
    let kube = KubeClient::new(&config.kube_url)
        .with_token(&config.kube_token)
        .with_kubectl(&config.kubectl);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = HttpObjectStore::new(&config.storage_endpoint, &config.storage_bucket)
        .with_token(&config.storage_token);

    PluginContext {
        jobs: JobManager::new(Arc::new(kube), clock.clone(), &config),
        store: Arc::new(store),
        helm: Arc::new(CliHelmClient::new(&config.helm)),
        render_sets: Arc::new(InMemoryRenderSets::new(environments)),
        clock,
        http: reqwest::Client::new(),
        config,
    }
}

pub async fn run_task(task_path: &str, render_sets: Option<&str>, output: Option<&str>) -> Result<()> {
    let content = std::fs::read_to_string(task_path)
        .with_context(|| format!("Failed to read task file: {}", task_path))?;
    let mut task: Task = serde_json::from_str(&content).context("Failed to parse task document")?;

    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Running task {}#{} on {} (namespace {})",
        task.pipeline_name, task.task_id, config.kube_url, config.namespace
    );

    let environments = load_render_sets(render_sets)?;
    let ctx = Arc::new(plugin_context(config, environments));
    let executor = StageExecutor::new(ctx, PluginRegistry::standard());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling task");
            on_signal.cancel();
        }
    });

    let status = executor.execute(&mut task, &cancel).await;
    print_result(&task);

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&task)?)
            .with_context(|| format!("Failed to write task file: {}", path))?;
        println!("  Written: {}", path.dimmed());
    }

    if status != TaskStatus::Passed {
        anyhow::bail!("task finished with status {}", status);
    }
    Ok(())
}

fn print_result(task: &Task) {
    println!();
    println!(
        "{} {}#{} {}",
        "Task".bold(),
        task.pipeline_name.bold(),
        task.task_id,
        colored_status(task.status)
    );
    for stage in &task.stages {
        println!("{} {}", stage.kind.to_string().bold(), colored_status(stage.status()));
        for (key, sub) in stage.sub_tasks.iter().filter(|(_, s)| s.is_enabled()) {
            let common = sub.common();
            println!("  - {} {}", key.cyan(), colored_status(common.status));
            if !common.error.is_empty() {
                println!("    {}", common.error.red());
            }
        }
    }
    if !task.error.is_empty() {
        println!("  Error: {}", task.error.red());
    }
}
