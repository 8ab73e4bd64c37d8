//! `weaver plan`: review and approve the plan a session drafted.

use std::path::Path;

use anyhow::Context;
use weaver_core::session::Plan;

pub async fn show(config_path: Option<&Path>, session_id: &str) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let store = super::open_store(&config).await;
    let session = store
        .get(session_id)
        .await
        .with_context(|| format!("session not found: {session_id}"))?;
    match session.plan() {
        Some(plan) => print_plan(&plan),
        None => println!("Session {session_id} has no plan yet."),
    }
    Ok(())
}

pub async fn confirm(config_path: Option<&Path>, session_id: &str) -> anyhow::Result<()> {
    let engine = super::build_engine(config_path).await?;
    let plan = engine.confirm_plan(session_id).await?;
    println!("Plan \"{}\" confirmed ({} steps).", plan.title, plan.steps.len());
    println!("Continue with: weaver run -s {session_id} -m \"start building\"");
    Ok(())
}

fn print_plan(plan: &Plan) {
    let progress = plan.progress();
    println!("{} [{}]", plan.title, plan.status);
    if let Some(summary) = plan.summary.as_deref().filter(|s| !s.is_empty()) {
        println!("  {summary}");
    }
    println!("  {}/{} steps done", progress.completed, progress.total);
    for step in &plan.steps {
        let mark = match step.status.as_str() {
            "completed" => "x",
            "in_progress" => ">",
            "failed" => "!",
            _ => " ",
        };
        println!("  [{mark}] {} {}", step.id, step.description);
        if let Some(note) = step.note.as_deref().filter(|n| !n.is_empty()) {
            println!("        {note}");
        }
    }
}
