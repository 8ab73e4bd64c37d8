//! `weaver confirm` / `weaver cancel`: resolve a paused session.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use weaver_agent::ConfirmOutcome;

pub async fn confirm(
    config_path: Option<&Path>,
    session_id: &str,
    action_id: &str,
    approved: bool,
) -> anyhow::Result<()> {
    let engine = super::build_engine(config_path).await?;
    match engine
        .confirm(session_id, action_id, approved, &CancellationToken::new())
        .await?
    {
        ConfirmOutcome::Executed(result) => {
            let status = if result.success { "succeeded" } else { "failed" };
            println!("Action {action_id} {status}: {}", result.observation());
        }
        ConfirmOutcome::Rejected => println!("Action {action_id} rejected."),
    }
    Ok(())
}

pub async fn cancel(config_path: Option<&Path>, session_id: &str) -> anyhow::Result<()> {
    let engine = super::build_engine(config_path).await?;
    engine.cancel(session_id).await?;
    println!("Session {session_id} cancelled.");
    Ok(())
}
