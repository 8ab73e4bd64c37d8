//! `weaver sessions`: inspect stored sessions.

use std::path::Path;

use anyhow::Context;
use weaver_core::session::SessionSnapshot;

pub async fn list(config_path: Option<&Path>, workspace: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config).await;
    let sessions = store.list(workspace).await;

    if sessions.is_empty() {
        println!("No sessions in workspace {workspace}.");
        return Ok(());
    }
    println!("{:<38} {:<10} {:<10} {:>5}  UPDATED", "ID", "STATUS", "PHASE", "MSGS");
    for s in &sessions {
        println!(
            "{:<38} {:<10} {:<10} {:>5}  {}",
            s.id,
            s.status.as_str(),
            s.phase.as_str(),
            s.messages.len(),
            s.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn show(config_path: Option<&Path>, id: &str, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config).await;
    let session = store
        .get(id)
        .await
        .with_context(|| format!("session not found: {id}"))?;
    let snapshot = session.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }
    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config).await;
    if !store.delete(id).await {
        anyhow::bail!("session not found: {id}");
    }
    println!("Deleted session {id}.");
    Ok(())
}

fn print_summary(s: &SessionSnapshot) {
    println!("Session:   {}", s.id);
    println!("Workspace: {}", s.workspace_id);
    println!("User:      {}", s.user_id);
    if let Some(persona) = &s.persona_id {
        println!("Persona:   {persona}");
    }
    println!("Status:    {}", s.status);
    println!("Phase:     {}", s.phase);
    println!("Hint:      {}", s.complexity_hint);
    if let Some(plan) = &s.plan {
        let progress = plan.progress();
        println!(
            "Plan:      {} ({}, {}/{} steps done)",
            plan.title, plan.status, progress.completed, progress.total
        );
    }
    if let Some(pending) = &s.pending_action {
        println!("Pending:   {} -> {}", pending.action_id, pending.tool_name);
    }
    println!("Tool calls: {}", s.tool_calls.len());
    println!();
    for entry in &s.messages {
        let text: String = entry.content.chars().take(120).collect();
        println!("  {:<9} {}", entry.role.as_str(), text.replace('\n', " "));
    }
}
