//! Built-in tool implementations for Weaver.
//!
//! The execution core ships only the planning tools; construction tools
//! (tables, UI schemas, workflows) are registered by the host.

pub mod plan;

use std::sync::Arc;
use weaver_core::tool::ToolRegistry;
use weaver_memory::SessionStore;

pub use plan::{CreatePlanTool, UpdatePlanTool};

/// Create a tool registry holding the built-in planning tools.
pub fn default_registry(sessions: Arc<SessionStore>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let builtins: [Arc<dyn weaver_core::Tool>; 2] = [
        Arc::new(CreatePlanTool::new(sessions.clone())),
        Arc::new(UpdatePlanTool::new(sessions)),
    ];
    for tool in builtins {
        if let Err(e) = registry.register(tool) {
            tracing::warn!(error = %e, "Skipping built-in tool");
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_plan_tools() {
        let registry = default_registry(Arc::new(SessionStore::new()));
        assert_eq!(registry.names(), vec!["create_plan", "update_plan"]);
        assert!(registry.descriptors().iter().all(|d| !d.requires_confirmation));
    }
}
