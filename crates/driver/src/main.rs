use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dk_domain::config::ConfigSeverity;
use dk_driver::cli::{Cli, Command};
use dk_driver::control::{self, ControlRequest, ControlResponse};
use dk_driver::{DriverState, ToolRegistry};
use dk_minds::MindsRoot;
use dk_providers::mock::EchoProvider;
use dk_providers::LlmProvider;
use dk_store::RunStore;

/// Exit codes: 0 clean, 1 config error, 2 runtime fatal.
const EXIT_CONFIG: i32 = 1;
const EXIT_RUNTIME: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            match serve(&cli).await {
                Ok(()) => {}
                Err(ServeError::Config(e)) => {
                    eprintln!("config error: {e:#}");
                    std::process::exit(EXIT_CONFIG);
                }
                Err(ServeError::Runtime(e)) => {
                    eprintln!("fatal: {e:#}");
                    std::process::exit(EXIT_RUNTIME);
                }
            }
        }
        Some(command) => {
            let request = match command {
                Command::Input { dialog_id, content } => ControlRequest::Input {
                    dialog_id: dialog_id.clone(),
                    content: content.clone(),
                },
                Command::Stop { dialog_id, reason } => ControlRequest::Stop {
                    dialog_id: dialog_id.clone(),
                    reason: reason.clone(),
                },
                Command::Resume { dialog_id } => ControlRequest::Resume {
                    dialog_id: dialog_id.clone(),
                },
                Command::Answer { q4h_id, text } => ControlRequest::Answer {
                    q4h_id: q4h_id.clone(),
                    text: text.clone(),
                },
                Command::Serve => unreachable!("handled above"),
            };
            match control::send_command(&cli.socket, &request).await {
                Ok(ControlResponse::Ok { detail }) => {
                    if let Some(detail) = detail {
                        println!("{detail}");
                    }
                }
                Ok(ControlResponse::Err { message }) => {
                    eprintln!("{message}");
                    std::process::exit(EXIT_RUNTIME);
                }
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(EXIT_RUNTIME);
                }
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dk_driver=debug")),
        )
        .init();
}

enum ServeError {
    Config(anyhow::Error),
    Runtime(anyhow::Error),
}

async fn serve(cli: &Cli) -> Result<(), ServeError> {
    tracing::info!("dialog kernel driver starting");

    // ── Mindset config ───────────────────────────────────────────────
    let minds = MindsRoot::new(&cli.minds);
    let team = minds.load_team().map_err(|e| ServeError::Config(e.into()))?;
    let llm = minds.load_llm().map_err(|e| ServeError::Config(e.into()))?;

    let mut issues = team.validate();
    issues.extend(llm.validate());
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        return Err(ServeError::Config(anyhow::anyhow!(
            "config validation failed with {errors} error(s)"
        )));
    }
    tracing::info!(
        members = team.members.len(),
        models = llm.models.len(),
        "mindset loaded"
    );

    // ── Provider ─────────────────────────────────────────────────────
    // Real adapters plug in through the LlmProvider trait; the built-in
    // echo provider keeps the process useful without one.
    let provider: Arc<dyn LlmProvider> = Arc::new(EchoProvider);
    tracing::info!(provider = provider.provider_id(), "LLM provider ready");

    // ── Stores and state ─────────────────────────────────────────────
    let store = RunStore::new(&cli.run_dir)
        .context("opening run store")
        .map_err(ServeError::Runtime)?;
    let state = DriverState::new(minds, team, llm, provider, store, ToolRegistry::new());
    tracing::info!(run_dir = %cli.run_dir.display(), "run store ready");

    // ── Rehydrate persisted dialogs + needs-drive flags ──────────────
    // Message logs are in-memory only; what survives a restart is the
    // dialog's identity, counters, and scheduling state.
    let mut recovered = 0;
    for self_id in state.store.dialog_ids() {
        let Ok(Some(snapshot)) = state.store.read_latest(&self_id) else {
            continue;
        };
        if snapshot.agent_id.is_empty() {
            continue;
        }
        if !state.arena.contains(&self_id) {
            let mut dialog = if snapshot.root_id.is_empty() || snapshot.root_id == self_id {
                dk_driver::Dialog::new_root(self_id.clone(), snapshot.agent_id.clone())
            } else {
                let supdialog = snapshot
                    .supdialog_id
                    .clone()
                    .unwrap_or_else(|| snapshot.root_id.clone());
                dk_driver::Dialog::new_sub(
                    dk_domain::DialogId::sub(self_id.clone(), snapshot.root_id.clone()),
                    snapshot.agent_id.clone(),
                    dk_domain::DialogId::sub(supdialog, snapshot.root_id.clone()),
                )
            };
            dialog.course = snapshot.course;
            state.arena.insert(dialog);
        }
        if snapshot.needs_drive && !snapshot.run_state.refuses_drive() {
            state.scheduler.flag(&self_id);
            recovered += 1;
        }
    }
    if recovered > 0 {
        tracing::info!(recovered, "recovered needs-drive flags");
    }

    // ── Scheduler ────────────────────────────────────────────────────
    tokio::spawn(state.scheduler.clone().run(state.clone()));

    // ── Control socket (runs until the process is killed) ────────────
    control::serve_control(state, &cli.socket)
        .await
        .context("control socket failed")
        .map_err(ServeError::Runtime)
}
