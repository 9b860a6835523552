//! Command-line surface: one-shot `run`, the JSON-lines `serve` loop and
//! the read-only `status` / `detect` probes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::engine::{AutomationEngine, EngineStatus, SubmitError};
use crate::models::{TaskDescriptor, TaskResult, WindowState};
use crate::platform::{PlatformDetector, PlatformInfo};
use crate::settings::{self, SettingsStore};
use crate::ssh::ProjectContext;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "cli";

use crate::{log_error, log_info, log_warn};

#[derive(Parser)]
#[command(
    name = "ide-autopilot",
    version,
    about = "Drive a desktop AI IDE as a scriptable prompt service"
)]
pub struct Cli {
    /// Settings file; defaults to $IDE_AUTOPILOT_CONFIG or ./ide-autopilot.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logs (also enabled by IDE_AUTOPILOT_DEBUG=1).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one prompt and print its result as JSON.
    Run {
        #[arg(short, long)]
        prompt: String,
        /// Project hint: ssh://host/path, vscode-remote://ssh-remote+host/path or a local path.
        #[arg(short, long)]
        context: Option<String>,
        /// Overall task deadline in milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Read TaskDescriptor JSON lines on stdin, write one JSON event per line.
    Serve,
    /// Print platform detection and the backend that would be used.
    /// Live task status is the `status` line of `serve`.
    Status,
    /// Locate the target window and report its project context.
    Detect {
        #[arg(short, long)]
        context: Option<String>,
    },
}

/// One line of `serve` output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ServeEvent {
    Accepted { task_id: String },
    Busy { active_task: String },
    Invalid { reason: String },
    Result(TaskResult),
    Status(EngineStatus),
    Cancel { requested: bool },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    platform: PlatformInfo,
    backend: Option<&'static str>,
    config_path: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectReport {
    platform: PlatformInfo,
    window: Option<WindowState>,
    context: Option<ProjectContext>,
}

pub fn main_with_args() -> Result<()> {
    let cli = Cli::parse();
    let debug = cli.debug || settings::debug_enabled();
    crate::utils::logging::init(debug);

    let config_path = cli.config.clone().unwrap_or_else(settings::default_config_path);
    let store = SettingsStore::new(config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Command::Run {
                prompt,
                context,
                deadline_ms,
            } => {
                let mut descriptor = TaskDescriptor::new(prompt);
                descriptor.context_hint = context;
                descriptor.deadline_ms = deadline_ms;
                cmd_run(&store, descriptor).await
            }
            Command::Serve => cmd_serve(&store, debug).await,
            Command::Status => cmd_status(&store),
            Command::Detect { context } => cmd_detect(&store, context.as_deref()).await,
        }
    })
}

fn engine_for(store: &SettingsStore) -> Result<AutomationEngine> {
    AutomationEngine::from_settings(store.current())
        .with_context(|| format!("failed to build engine from {}", store.path().display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run(store: &SettingsStore, descriptor: TaskDescriptor) -> Result<()> {
    let engine = engine_for(store)?;
    let result = engine.run(descriptor).await?;
    print_json(&result)?;
    if !result.is_success() {
        anyhow::bail!(
            "task {} ended {:?}: {}",
            result.task_id,
            result.state,
            result.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

fn cmd_status(store: &SettingsStore) -> Result<()> {
    let platform = PlatformDetector::detect();
    let backend = match PlatformDetector::select_backend(&platform) {
        Ok(backend) => Some(backend.name()),
        Err(err) => {
            log_warn!("no usable automation backend: {err:#}");
            None
        }
    };
    print_json(&StatusReport {
        platform,
        backend,
        config_path: store.path().to_path_buf(),
    })
}

async fn cmd_detect(store: &SettingsStore, hint: Option<&str>) -> Result<()> {
    let platform = PlatformDetector::detect();
    let engine = engine_for(store)?;
    let observed = engine.observe_target(hint).await?;
    let (window, context) = match observed {
        Some((window, context)) => (Some(window), Some(context)),
        None => (None, None),
    };
    print_json(&DetectReport {
        platform,
        window,
        context,
    })
}

async fn cmd_serve(store: &SettingsStore, debug: bool) -> Result<()> {
    let engine = engine_for(store)?;
    let heartbeat = Duration::from_secs(if debug { 5 } else { 30 });
    log_info!("serving on stdin/stdout (heartbeat {:?})", heartbeat);

    let (events, mut outbox) = mpsc::unbounded_channel::<ServeEvent>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = outbox.recv().await {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                handle_line(&engine, line.trim(), &events, &mut in_flight);
            }
            _ = ticker.tick() => {
                let status = engine.status();
                match &status.active {
                    Some(active) => log_info!(
                        "heartbeat: task {} {:?} attempt {}",
                        active.task_id,
                        active.state,
                        active.attempts
                    ),
                    None => log_info!("heartbeat: idle, {} recent results", status.recent.len()),
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = joined {
                    log_error!("result forwarder failed: {err}");
                }
            }
        }
    }

    log_info!("stdin closed, waiting for {} in-flight task(s)", in_flight.len());
    while in_flight.join_next().await.is_some() {}
    drop(events);
    writer.await.context("serve writer panicked")??;
    Ok(())
}

fn handle_line(
    engine: &AutomationEngine,
    line: &str,
    events: &mpsc::UnboundedSender<ServeEvent>,
    in_flight: &mut JoinSet<()>,
) {
    if line.is_empty() {
        return;
    }

    let event = match line {
        "status" => ServeEvent::Status(engine.status()),
        "cancel" => ServeEvent::Cancel {
            requested: engine.cancel(),
        },
        _ => match serde_json::from_str::<TaskDescriptor>(line) {
            Err(err) => ServeEvent::Invalid {
                reason: format!("malformed task: {err}"),
            },
            Ok(descriptor) => match engine.submit(descriptor) {
                Ok(handle) => {
                    let task_id = handle.task_id.clone();
                    let forward = events.clone();
                    in_flight.spawn(async move {
                        let result = handle.wait().await;
                        let _ = forward.send(ServeEvent::Result(result));
                    });
                    ServeEvent::Accepted { task_id }
                }
                Err(SubmitError::Busy { active_task }) => {
                    log_warn!("rejected task while {} is active", active_task);
                    ServeEvent::Busy { active_task }
                }
                Err(SubmitError::Invalid(reason)) => ServeEvent::Invalid { reason },
            },
        },
    };

    let _ = events.send(event);
}
