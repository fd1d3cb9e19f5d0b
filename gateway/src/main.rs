use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use cede_analysis::{
    analyze_file, AnalysisError, EngineClient, EngineConfig, PollOptions, ResultCache,
    TaskWatcher, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS,
};
use cede_history::HistoryStore;
use cede_observability::{emit_event, init_process_logging, AnalysisEvent, ProcessKind};
use cede_server::{serve, AppState};
use cede_types::{AnalysisHistoryRecord, HistoryStatus, ProgressSnapshot, TaskState};

#[derive(Parser, Debug)]
#[command(name = "cede-gateway")]
#[command(about = "Reinsurance analysis gateway: task orchestration and history API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the analysis-history API.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8760)]
        port: u16,
        /// Base URL of the external analysis engine (required).
        #[arg(long, env = "CEDE_ENGINE_URL")]
        engine_url: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Submit a document and follow it to completion.
    Analyze {
        file: PathBuf,
        /// Base URL of the external analysis engine (required).
        #[arg(long, env = "CEDE_ENGINE_URL")]
        engine_url: String,
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        interval_ms: u64,
        /// Skip writing the result to the local cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Follow a task's status at a fixed interval until it goes terminal.
    Watch {
        task_id: String,
        /// Base URL of the external analysis engine (required).
        #[arg(long, env = "CEDE_ENGINE_URL")]
        engine_url: String,
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
        interval_ms: u64,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Fetch a completed task's result, preferring the local cache.
    Result {
        task_id: String,
        /// Base URL of the external analysis engine (required).
        #[arg(long, env = "CEDE_ENGINE_URL")]
        engine_url: String,
        /// Bypass the local result cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Print recent terminal outcomes from the history ledger.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            engine_url,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Gateway, &state_dir.join("logs"), 14)?;
            info!("gateway logging initialized: {log_info:?}");

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let history = Arc::new(HistoryStore::new(state_dir.join("storage")));
            let engine = EngineClient::new(EngineConfig::new(engine_url));
            if !engine.health().await {
                tracing::warn!(
                    "analysis engine at {} is not answering health checks",
                    engine.base_url()
                );
            }
            serve(addr, AppState::new(history, engine)).await
        }
        Command::Analyze {
            file,
            engine_url,
            max_attempts,
            interval_ms,
            no_cache,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_log_guard, _log_info) =
                init_process_logging(ProcessKind::Cli, &state_dir.join("logs"), 14)?;
            let engine = EngineClient::new(EngineConfig::new(engine_url));
            let options = PollOptions {
                max_attempts,
                interval: Duration::from_millis(interval_ms),
            };
            run_analyze(engine, file, options, state_dir, !no_cache).await
        }
        Command::Watch {
            task_id,
            engine_url,
            interval_ms,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let (_log_guard, _log_info) =
                init_process_logging(ProcessKind::Cli, &state_dir.join("logs"), 14)?;
            let engine = EngineClient::new(EngineConfig::new(engine_url));
            let watcher = TaskWatcher::spawn(
                Arc::new(engine),
                task_id,
                Duration::from_millis(interval_ms),
                |status| {
                    let progress = status.progress.unwrap_or(0);
                    let message = status.current_status.unwrap_or_default();
                    eprintln!("[{progress:>3}%] {} {message}", status.status);
                },
            );
            let token = watcher.token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });
            watcher.join().await;
            Ok(())
        }
        Command::Result {
            task_id,
            engine_url,
            no_cache,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let engine = EngineClient::new(EngineConfig::new(engine_url));
            run_result(engine, task_id, state_dir, !no_cache).await
        }
        Command::History { limit, state_dir } => {
            let history = HistoryStore::new(resolve_state_dir(state_dir).join("storage"));
            let records = history.list(limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

/// Cache-first retrieval of a completed result; a miss (including an
/// unreadable entry) falls back to a live fetch.
async fn run_result(
    engine: EngineClient,
    task_id: String,
    state_dir: PathBuf,
    use_cache: bool,
) -> anyhow::Result<()> {
    let cache = ResultCache::new(state_dir.join("cache")).await?;
    if use_cache {
        if let Some(result) = cache.get(&task_id).await {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
    }

    let status = engine.task_status(&task_id).await?;
    match status.status {
        TaskState::Success => {
            let result = match status.result {
                Some(result) => result,
                None => engine.task_result(&task_id).await?,
            };
            if use_cache {
                if let Err(err) = cache.set(&task_id, &result).await {
                    tracing::warn!("could not cache result for task {task_id}: {err:#}");
                }
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        TaskState::Failed => anyhow::bail!(
            "{}",
            status
                .error
                .unwrap_or_else(|| "Analysis failed".to_string())
        ),
        state => {
            println!("task {task_id} is still {state}");
            Ok(())
        }
    }
}

async fn run_analyze(
    engine: EngineClient,
    file: PathBuf,
    options: PollOptions,
    state_dir: PathBuf,
    use_cache: bool,
) -> anyhow::Result<()> {
    let correlation_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let history = HistoryStore::new(state_dir.join("storage"));
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("submission")
        .to_string();

    emit_event(
        tracing::Level::INFO,
        ProcessKind::Cli,
        AnalysisEvent {
            event: "analysis.started",
            component: "gateway.analyze",
            correlation_id: Some(&correlation_id),
            task_id: None,
            file_name: Some(&file_name),
            status: None,
            error_code: None,
            detail: None,
        },
    );

    let mut observed: Vec<ProgressSnapshot> = Vec::new();
    let outcome = analyze_file(&engine, &file, options, |update| {
        if let Some(snapshot) = &update.snapshot {
            observed.push(snapshot.clone());
        }
        eprintln!("[{:>3}%] {}", update.progress, update.stage);
    })
    .await;

    match outcome {
        Ok(outcome) => {
            if use_cache {
                match ResultCache::new(state_dir.join("cache")).await {
                    Ok(cache) => {
                        if let Err(err) = cache.set(&outcome.task_id, &outcome.result).await {
                            tracing::warn!(
                                "could not cache result for task {}: {err:#}",
                                outcome.task_id
                            );
                        }
                    }
                    Err(err) => tracing::warn!("could not open result cache: {err:#}"),
                }
            }
            let record = AnalysisHistoryRecord {
                task_id: outcome.task_id.clone(),
                file_name,
                status: HistoryStatus::Success,
                started_at,
                completed_at: Utc::now(),
                result: Some(outcome.result.clone()),
                error: None,
                metadata: Some(run_metadata(&correlation_id, engine.base_url())),
                progress_history: outcome.progress_history,
                persisted_by: None,
            };
            history.upsert(record).await?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Cli,
                AnalysisEvent {
                    event: "analysis.completed",
                    component: "gateway.analyze",
                    correlation_id: Some(&correlation_id),
                    task_id: Some(&outcome.task_id),
                    file_name: None,
                    status: Some("SUCCESS"),
                    error_code: None,
                    detail: None,
                },
            );
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }
        Err(err) => {
            // Only an engine-reported failure is a terminal outcome worth a
            // ledger entry; timeouts and transport faults are not.
            if let Some(AnalysisError::Failed { task_id, message }) =
                err.downcast_ref::<AnalysisError>()
            {
                let record = AnalysisHistoryRecord {
                    task_id: task_id.clone(),
                    file_name,
                    status: HistoryStatus::Failed,
                    started_at,
                    completed_at: Utc::now(),
                    result: None,
                    error: Some(message.clone()),
                    metadata: Some(run_metadata(&correlation_id, engine.base_url())),
                    progress_history: observed,
                    persisted_by: None,
                };
                if let Err(persist_err) = history.upsert(record).await {
                    tracing::warn!("could not persist failed outcome: {persist_err:#}");
                }
            }
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::Cli,
                AnalysisEvent {
                    event: "analysis.failed",
                    component: "gateway.analyze",
                    correlation_id: Some(&correlation_id),
                    task_id: None,
                    file_name: None,
                    status: Some("FAILED"),
                    error_code: None,
                    detail: Some(&err.to_string()),
                },
            );
            Err(err)
        }
    }
}

fn run_metadata(correlation_id: &str, engine_url: &str) -> serde_json::Value {
    json!({
        "source": "cli",
        "correlationId": correlation_id,
        "engine": engine_url,
    })
}

fn resolve_state_dir(dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = dir {
        return dir;
    }
    dirs::data_dir()
        .map(|d| d.join("cede"))
        .unwrap_or_else(|| PathBuf::from(".cede"))
}
