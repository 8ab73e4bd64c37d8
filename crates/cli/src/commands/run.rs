//! `weaver run`: send one message and stream the agent's events.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use weaver_agent::{AgentEvent, ConfirmOutcome, RunRequest};
use weaver_core::session::PlanStatus;

pub struct RunOptions {
    pub message: String,
    pub session: Option<String>,
    pub workspace: String,
    pub user: String,
    pub persona: Option<String>,
    pub auto_approve: bool,
    pub json: bool,
}

pub async fn run(config_path: Option<&Path>, opts: RunOptions) -> anyhow::Result<()> {
    let engine = super::build_engine(config_path).await?;
    let session_id = opts
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut request = RunRequest::new(&session_id, &opts.workspace, &opts.user, &opts.message);
    request.persona_id = opts.persona.clone();

    // Ctrl+C cancels the run; the engine reports it as an error event
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if !opts.json {
        eprintln!("  Session: {session_id}");
    }

    let mut rx = engine.run(request, cancel);
    let mut pending = None;
    let mut failed = false;
    while let Some(event) = rx.recv().await {
        print_event(&event, opts.json)?;
        match event {
            AgentEvent::ConfirmationRequired { action_id, tool_name, .. } => {
                pending = Some((action_id, tool_name));
            }
            AgentEvent::Error { .. } => failed = true,
            _ => {}
        }
    }

    if let Some((action_id, tool_name)) = pending {
        let approved = opts.auto_approve || ask_approval(&tool_name).await?;
        let outcome = engine
            .confirm(&session_id, &action_id, approved, &CancellationToken::new())
            .await?;
        match outcome {
            ConfirmOutcome::Executed(result) if opts.json => {
                println!("{}", serde_json::to_string(&result)?);
            }
            ConfirmOutcome::Executed(result) => {
                let status = if result.success { "ok" } else { "failed" };
                println!("  [{tool_name}] {status}: {}", result.observation());
            }
            ConfirmOutcome::Rejected if !opts.json => println!("  Rejected {tool_name}."),
            ConfirmOutcome::Rejected => {}
        }
    }

    if failed {
        anyhow::bail!("run failed");
    }
    if !opts.json {
        let drafted = match engine.sessions().get(&session_id).await {
            Some(session) => session.plan().is_some_and(|p| p.status == PlanStatus::Draft),
            None => false,
        };
        if drafted {
            eprintln!(
                "  Plan drafted. Review it with `weaver plan show {session_id}`, \
                 then approve it with `weaver plan confirm {session_id}`."
            );
        }
    }
    Ok(())
}

fn print_event(event: &AgentEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        AgentEvent::Thought { step, content, .. } => println!("  [{step}] {content}"),
        AgentEvent::ToolCall { tool_name, tool_args, .. } => {
            println!("      -> {tool_name} {tool_args}")
        }
        AgentEvent::ToolResult {
            tool_name,
            tool_result,
            affected_resource,
            ..
        } => {
            let status = if tool_result.success { "ok" } else { "failed" };
            let resource = affected_resource
                .map(|r| format!(" ({})", r.as_str()))
                .unwrap_or_default();
            println!("      <- {tool_name} {status}{resource}: {}", tool_result.observation());
        }
        AgentEvent::ConfirmationRequired { content, action_id, .. } => {
            println!("  ? {content} [{action_id}]")
        }
        AgentEvent::Message { content, .. } => {
            println!();
            for line in content.lines() {
                println!("  Assistant > {line}");
            }
            println!();
        }
        AgentEvent::Done { .. } => {}
        AgentEvent::Error { error, .. } => eprintln!("  [Error] {error}"),
    }
    Ok(())
}

async fn ask_approval(tool_name: &str) -> anyhow::Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("  Approve {tool_name}? [y/N] ").as_bytes())
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
