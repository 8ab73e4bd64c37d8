//! `weaver personas` / `weaver skills`: show the built-in catalogs.

use std::sync::Arc;

use weaver_agent::{PersonaRegistry, SkillRegistry};
use weaver_memory::SessionStore;

pub async fn personas(category: Option<&str>) -> anyhow::Result<()> {
    let registry = PersonaRegistry::new();
    let personas = match category {
        Some(category) => registry.list_by_category(category),
        None => registry.list(),
    };

    for p in &personas {
        let state = if p.enabled { "" } else { " (disabled)" };
        println!("{} {} [{}]{state}", p.icon, p.name, p.id);
        println!("    {}", p.description);
        let tools = if p.tool_filter.is_empty() {
            "all".to_string()
        } else {
            p.tool_filter.join(", ")
        };
        println!("    category: {}  tools: {tools}", p.category);
        for suggestion in &p.suggestions {
            println!("    - {suggestion}");
        }
        println!();
    }
    Ok(())
}

pub async fn skills() -> anyhow::Result<()> {
    let registry = SkillRegistry::with_builtins(Arc::new(SessionStore::new()));
    for s in registry.list() {
        let state = if s.enabled { "enabled" } else { "disabled" };
        println!("{} [{}] {state}", s.name, s.id);
        if !s.description.is_empty() {
            println!("    {}", s.description);
        }
        println!("    tools: {}", s.tool_names().join(", "));
    }
    Ok(())
}
