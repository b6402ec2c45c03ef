use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use juggernaut_core::ids::{FallbackTaskId, SessionId};
use juggernaut_core::mode::AgentMode;
use juggernaut_engine::notify::WebhookNotifier;
use juggernaut_engine::tools::{create_default_registry, RemoteToolExecutor};
use juggernaut_engine::{ControllerConfig, LoopController, SessionRequest, SessionServices};
use juggernaut_llm::{OpenRouterConfig, OpenRouterProvider};
use juggernaut_server::{AppState, ServerConfig};
use juggernaut_settings::{load_settings, load_settings_from_path, JuggernautSettings};
use juggernaut_store::{Database, FallbackTaskRepo, MessageRepo, SessionRepo};
use juggernaut_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "juggernaut", version, about = "Tool-calling agent loop with budgets and guardrails")]
struct Cli {
    /// Settings file (defaults to ~/.juggernaut/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP/SSE API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one session and print its events as JSON lines.
    Run {
        #[arg(long)]
        mode: Option<AgentMode>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_steps: Option<u32>,
        #[arg(long)]
        max_seconds: Option<u64>,
        prompt: String,
    },
    /// Show recent sessions, or one session with its message log.
    History {
        session_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// List open fallback tasks, or close one with `--done <task-id>`.
    Tasks {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, value_name = "TASK_ID")]
        done: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(TelemetryConfig {
        filter: settings.logging.level.clone(),
        json: true,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.log_db_path(),
    });

    match cli.command {
        Command::Serve { host, port } => serve(&settings, host, port).await,
        Command::Run {
            mode,
            model,
            max_steps,
            max_seconds,
            prompt,
        } => {
            let request = SessionRequest {
                prompt,
                mode,
                model,
                max_steps,
                max_seconds,
                session_id: None,
            };
            run(&settings, request).await
        }
        Command::History { session_id, limit } => history(&settings, session_id, limit),
        Command::Tasks { limit, done } => tasks(&settings, limit, done),
    }
}

async fn serve(settings: &JuggernautSettings, host: Option<String>, port: Option<u16>) -> Result<ExitCode> {
    let controller = build_controller(settings)?;

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let handle = juggernaut_server::start(config, AppState::new(controller))
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.addr, "juggernaut ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn run(settings: &JuggernautSettings, request: SessionRequest) -> Result<ExitCode> {
    let controller = build_controller(settings)?;
    let (session_id, mut events, cancel, join) = controller.start(request).into_parts();
    tracing::info!(%session_id, "session started");

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                cancel.cancel();
            }
        }
    }

    let outcome = join.await.context("session task failed")?;
    match outcome.stop_reason {
        Some(reason) if reason.is_abnormal() => {
            tracing::warn!(%session_id, code = reason.code(), "session stopped");
            Ok(ExitCode::FAILURE)
        }
        Some(_) => Ok(ExitCode::from(130)),
        None => Ok(ExitCode::SUCCESS),
    }
}

fn history(settings: &JuggernautSettings, session_id: Option<String>, limit: u32) -> Result<ExitCode> {
    let db = open_database(settings)?;
    let sessions = SessionRepo::new(db.clone());

    match session_id {
        Some(id) => {
            let id = SessionId::from_raw(id);
            let session = sessions.get(&id)?;
            let messages = MessageRepo::new(db).list(&id)?;
            let view = serde_json::json!({ "session": session, "messages": messages });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        None => {
            for row in sessions.list_recent(limit)? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn tasks(settings: &JuggernautSettings, limit: u32, done: Option<String>) -> Result<ExitCode> {
    let repo = FallbackTaskRepo::new(open_database(settings)?);
    if let Some(id) = done {
        repo.mark_done(&FallbackTaskId::from_raw(id.as_str()))
            .with_context(|| format!("failed to close task {id}"))?;
        return Ok(ExitCode::SUCCESS);
    }
    for task in repo.list_open(limit)? {
        println!("{}", serde_json::to_string(&task)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn open_database(settings: &JuggernautSettings) -> Result<Database> {
    let path = settings.db_path();
    Database::open(&path).with_context(|| format!("failed to open database at {}", path.display()))
}

fn build_controller(settings: &JuggernautSettings) -> Result<LoopController> {
    let api_key = std::env::var(&settings.llm.api_key_env)
        .with_context(|| format!("{} is not set", settings.llm.api_key_env))?;
    let mut llm = OpenRouterConfig::new(
        settings.llm.base_url.clone(),
        SecretString::from(api_key),
        settings.llm.model.clone(),
    );
    llm.request_timeout = Duration::from_secs(settings.llm.request_timeout_secs);
    llm.connect_timeout = Duration::from_secs(settings.llm.connect_timeout_secs);
    llm.idle_timeout = Duration::from_secs(settings.llm.stream_idle_timeout_secs);
    let provider = OpenRouterProvider::new(llm).context("failed to build LLM client")?;

    let mut services = SessionServices::with_database(open_database(settings)?);
    if let Some(url) = &settings.notifications.webhook_url {
        services = services.with_notifier(Arc::new(WebhookNotifier::new(url.clone())));
    }

    let executor = Arc::new(RemoteToolExecutor::new(
        settings.tools.executor_url.clone(),
        Duration::from_secs(settings.tools.timeout_secs),
    ));
    let registry = create_default_registry(executor, services.fallback.clone());

    Ok(LoopController::new(
        Arc::new(provider),
        Arc::new(registry),
        services,
        ControllerConfig::from_settings(settings),
    ))
}
