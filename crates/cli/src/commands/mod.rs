//! CLI command handlers and the shared runtime they build.

pub mod catalog;
pub mod config_cmd;
pub mod confirm;
pub mod plan;
pub mod run;
pub mod sessions;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, warn};
use weaver_agent::{AgentEngine, EngineConfig, PersonaRegistry, SkillRegistry};
use weaver_config::AppConfig;
use weaver_memory::{SessionStore, SqlitePersister};

/// Load the config from `path`, or from `~/.weaver/config.toml` when absent.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|name| std::env::var(name).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Open the session store the config asks for.
///
/// An unreachable SQLite database degrades to in-memory sessions.
pub async fn open_store(config: &AppConfig) -> SessionStore {
    let store = SessionStore::new();
    if config.store.backend != "sqlite" {
        return store;
    }

    let path = config.store.resolved_path();
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Could not create store directory");
        }
    }
    match SqlitePersister::new(&format!("sqlite://{}", path.display())).await {
        Ok(persister) => store.with_persister(Arc::new(persister)),
        Err(e) => {
            warn!(error = %e, "SQLite unavailable, sessions will not outlive this process");
            store
        }
    }
}

/// Build an engine with the built-in tools, personas and skills.
pub async fn build_engine(config_path: Option<&Path>) -> anyhow::Result<AgentEngine> {
    let config = load_config(config_path).context("Failed to load config")?;
    let sessions = Arc::new(open_store(&config).await);

    let tools = weaver_tools::default_registry(sessions.clone());
    let skills = SkillRegistry::with_builtins(sessions.clone());
    let loaded = skills.load_tools_into_registry(&tools);
    debug!(tools = tools.len(), skill_tools = loaded, "Tool registry ready");

    if !config.has_api_key() {
        warn!("No API key configured, using the offline heuristic model");
    }

    Ok(AgentEngine::new(EngineConfig::from_app_config(&config), Arc::new(tools), sessions)
        .with_personas(Arc::new(PersonaRegistry::new()))
        .with_skills(Arc::new(skills)))
}
