// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, SessionCommands};
use orca_core::{
    cancel_pair, AgentEvent, AgentTypeRegistry, CancelHandle, CancelToken, Conversation,
    LoopRunner, SessionStore, SubAgentLimits, SubAgentOrchestrator, TaskTool, TurnEngine,
};
use orca_model::ModelClient;
use orca_tools::{
    CheckpointStore, HookRunner, MemoryStore, PermissionGate, PermissionPrompter,
    ProcessSupervisor, PromptChoice, RateLimiter, ToolRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = orca_config::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::ShowConfig => {
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                Ok(())
            }
            Commands::Models => {
                let model = orca_model::from_config(&config.model);
                for id in model.list_models().await? {
                    println!("{id}");
                }
                Ok(())
            }
            Commands::Sessions { command } => run_session_command(command),
        };
    }

    run_agent(cli, config).await
}

fn init_logging(verbose: bool) {
    // Deltas stream to stdout; stderr stays safe for diagnostics.
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orca=debug,info"))
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn apply_overrides(config: &mut orca_config::Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(url) = &cli.base_url {
        config.model.base_url = url.clone();
    }
    if cli.no_native_tools {
        config.model.native_tools = false;
    }
    if let Some(n) = cli.max_iterations {
        config.agent.max_iterations = n;
    }
    if let Some(mode) = cli.mode {
        config.agent.default_mode = mode.into();
    }
    if cli.yes {
        config.tools.auto_approve_moderate = true;
    }
}

fn run_session_command(cmd: &SessionCommands) -> anyhow::Result<()> {
    let store = SessionStore::new(orca_config::config_dir().join("sessions"));
    match cmd {
        SessionCommands::List => {
            for s in store.list() {
                println!(
                    "{}  {}  {}  ({} messages)",
                    s.id,
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.title,
                    s.messages.len()
                );
            }
        }
        SessionCommands::Tree => print!("{}", store.tree()),
        SessionCommands::Delete { id } => {
            store.delete(id)?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

/// Interactive yes/no/always prompt on the controlling terminal.
struct StdinPrompter;

#[async_trait::async_trait]
impl PermissionPrompter for StdinPrompter {
    async fn ask(&self, tool: &str, args_json: &str) -> PromptChoice {
        let question = format!("\nAllow {tool} {args_json}? [y]es / [n]o / [a]lways: ");
        let answer = tokio::task::spawn_blocking(move || {
            print!("{question}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            line
        })
        .await
        .unwrap_or_default();
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => PromptChoice::Yes,
            "a" | "always" => PromptChoice::AlwaysForTool,
            _ => PromptChoice::No,
        }
    }
}

struct Agent {
    runner: LoopRunner,
    convo: Conversation,
    session_id: String,
    store: SessionStore,
    supervisor: Arc<ProcessSupervisor>,
    memory: Arc<MemoryStore>,
    events: tokio::sync::mpsc::Receiver<AgentEvent>,
    cancel: CancelToken,
    cancel_handle: Arc<CancelHandle>,
    workdir: String,
    model_name: String,
}

fn build_agent(config: &orca_config::Config, resume: Option<&str>) -> anyhow::Result<Agent> {
    let config_dir = orca_config::config_dir();
    let workdir = std::env::current_dir().context("determining working directory")?;

    let model = orca_model::from_config(&config.model);
    let model_name = model.model_name().to_string();

    let supervisor = ProcessSupervisor::new();
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
        config.tools.min_request_interval_ms,
    )));
    let memory = Arc::new(MemoryStore::new(
        Some(&workdir),
        config_dir.join("memory"),
        config.memory.max_memory_files,
    ));

    let gate = Arc::new(PermissionGate::from_config(&config.tools));
    gate.set_prompter(Arc::new(StdinPrompter));
    let hooks = Arc::new(HookRunner::new(config.hooks.clone()));
    let checkpoints = Arc::new(CheckpointStore::new(config_dir.join("checkpoints")));
    let store = SessionStore::new(config_dir.join("sessions"));

    let (cancel_handle, cancel) = cancel_pair();
    let cancel_handle = Arc::new(cancel_handle);

    // Sub-agent orchestrator and the task tool form the one circular seam:
    // the orchestrator needs the registry, the registry holds the task tool,
    // the task tool holds the orchestrator.  The registry is wired last.
    let types = AgentTypeRegistry::load(Some(&workdir), &config_dir);
    let limits = SubAgentLimits {
        max_iterations: config.agent.max_iterations,
        timeout: Duration::from_secs(config.agent.subagent_timeout_secs),
        context_window: config.model.context_window,
        chars_per_token: config.agent.chars_per_token,
        native_tools: config.model.native_tools,
        idle_timeout: Duration::from_secs(config.model.idle_timeout_secs),
    };
    let orchestrator = Arc::new(SubAgentOrchestrator::new(
        Arc::clone(&model),
        Arc::clone(&gate),
        Arc::clone(&hooks),
        Arc::clone(&checkpoints),
        types,
        limits,
        workdir.clone(),
    ));

    let mut registry = orca_tools::builtin_registry(
        Arc::clone(&supervisor),
        limiter,
        Arc::clone(&memory),
        config.tools.bash_timeout_secs,
    )?;
    registry.register(TaskTool::new(Arc::clone(&orchestrator), cancel.clone()))?;
    let registry: Arc<ToolRegistry> = Arc::new(registry);
    orchestrator.wire_registry(Arc::clone(&registry));

    // Resume a saved session or allocate a fresh id, so checkpoints and the
    // session file agree from the first mutation on.
    let (mut convo, session_id) = match resume {
        Some(id) => {
            let (convo, record) = store.load(id, config.agent.chars_per_token)?;
            println!("resumed session {id} ({} messages)", record.messages.len());
            (convo, id.to_string())
        }
        None => (
            Conversation::new(config.agent.chars_per_token),
            uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        ),
    };

    if convo.system_prompt.is_none() {
        let protocol = (!config.model.native_tools)
            .then(|| orca_core::prompts::text_tool_protocol(&registry.schemas()));
        convo.system_prompt = Some(orca_core::prompts::system_prompt(
            config.agent.system_prompt.as_deref(),
            &workdir.display().to_string(),
            &memory.load_context(),
            protocol.as_deref(),
        ));
    }

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(1024);
    let engine = TurnEngine::new(
        model,
        Arc::clone(&registry),
        gate,
        hooks,
        checkpoints,
        session_id.clone(),
        config.agent.default_mode,
        config.model.native_tools,
        Duration::from_secs(config.model.idle_timeout_secs),
        events_tx.clone(),
    );
    let runner = LoopRunner::new(
        engine,
        config.agent.max_iterations,
        config.agent.compaction_threshold,
        config.agent.preserve_recent,
        config.model.context_window,
        (config.agent.loop_timeout_secs > 0)
            .then(|| Duration::from_secs(config.agent.loop_timeout_secs)),
        registry.names(),
        events_tx,
    );

    spawn_ctrl_c_task(Arc::clone(&cancel_handle), Arc::clone(&supervisor));

    Ok(Agent {
        runner,
        convo,
        session_id,
        store,
        supervisor,
        memory,
        events: events_rx,
        cancel,
        cancel_handle,
        workdir: workdir.display().to_string(),
        model_name,
    })
}

/// First Ctrl-C cancels the in-flight turn; a second within two seconds
/// kills all children and terminates the process.
fn spawn_ctrl_c_task(handle: Arc<CancelHandle>, supervisor: Arc<ProcessSupervisor>) {
    tokio::spawn(async move {
        let mut last: Option<Instant> = None;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if let Some(prev) = last {
                if prev.elapsed() < Duration::from_secs(2) {
                    eprintln!("\nexiting");
                    supervisor.shutdown();
                    std::process::exit(130);
                }
            }
            eprintln!("\ncancelling... (Ctrl-C again to exit)");
            last = Some(Instant::now());
            handle.cancel();
        }
    });
}

async fn run_agent(cli: Cli, config: orca_config::Config) -> anyhow::Result<()> {
    let mut agent = build_agent(&config, cli.resume.as_deref())?;
    println!("orca · model {} · {}", agent.model_name, agent.workdir);

    let result = match &cli.prompt {
        Some(prompt) => run_one_request(&mut agent, prompt).await,
        None => repl(&mut agent).await,
    };

    if config.memory.auto_memory && !agent.convo.messages.is_empty() {
        write_auto_memory(&mut agent).await;
    }

    // Kill every background child before the host exits.
    agent.supervisor.shutdown();
    result
}

/// Distill a learnings paragraph from the finished conversation and store
/// it for future sessions.  Failures are logged, never fatal.
async fn write_auto_memory(agent: &mut Agent) {
    let history = orca_core::runner::serialize_history(&agent.convo.messages);
    match agent
        .runner
        .engine_mut()
        .distill_learnings(&history, &agent.cancel)
        .await
    {
        Ok(Some(learnings)) => match agent.memory.store(&learnings).await {
            Ok(path) => println!("· remembered in {}", path.display()),
            Err(e) => warn!(error = %e, "failed to store memory"),
        },
        Ok(None) => {}
        Err(e) => warn!(error = %e, "failed to distill learnings"),
    }
}

async fn repl(agent: &mut Agent) -> anyhow::Result<()> {
    loop {
        let line = tokio::task::spawn_blocking(|| {
            print!("\norca> ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) => None, // EOF
                Ok(_) => Some(line),
                Err(_) => None,
            }
        })
        .await
        .unwrap_or(None);

        let Some(line) = line else {
            return Ok(());
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            return Ok(());
        }
        run_one_request(agent, input).await?;
    }
}

async fn run_one_request(agent: &mut Agent, input: &str) -> anyhow::Result<()> {
    agent.cancel_handle.reset();
    agent.convo.push(orca_model::Message::user(input));

    // Drive the loop and render events concurrently.
    let cancel = agent.cancel.clone();
    let outcome = {
        let run = agent.runner.run(&mut agent.convo, &cancel);
        tokio::pin!(run);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                Some(event) = agent.events.recv() => render_event(event),
            }
        }
    };
    // Drain whatever the loop emitted after its last await point.
    while let Ok(event) = agent.events.try_recv() {
        render_event(event);
    }
    println!();

    if let Err(e) = outcome {
        warn!(error = %e, "agent loop failed");
        eprintln!("error: {e:#}");
    }

    // Persist after every exchange.
    match agent.store.save(
        &agent.convo,
        None,
        Some(agent.session_id.as_str()),
        &agent.workdir,
        &agent.model_name,
    ) {
        Ok(id) => agent.session_id = id,
        Err(e) => warn!(error = %e, "failed to save session"),
    }
    Ok(())
}

fn render_event(event: AgentEvent) {
    match event {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ThinkingDelta(_) => {}
        AgentEvent::ToolCallStarted { name, args_json, .. } => {
            println!("\n· {name} {args_json}");
        }
        AgentEvent::ToolOutputChunk { line, .. } => println!("  │ {line}"),
        AgentEvent::ToolCallFinished { name, is_error, .. } => {
            if is_error {
                println!("  ✗ {name} failed");
            }
        }
        AgentEvent::ContextCompacted { tokens_before, tokens_after } => {
            println!("· compacted context ({tokens_before} → {tokens_after} tokens)");
        }
        AgentEvent::Aborted { .. } => println!("\n· cancelled"),
        AgentEvent::Error(e) => eprintln!("error: {e}"),
        AgentEvent::TextComplete(_) | AgentEvent::TurnComplete => {}
    }
}
