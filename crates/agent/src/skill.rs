//! Skill registry: bundles of tools plus a system-prompt delta.
//!
//! Enabling a skill loads its tools into the shared [`ToolRegistry`] and adds
//! its prompt delta to every run. The tool registry is append-only, so a
//! disabled or deleted skill's tools stay registered but are reported by
//! [`SkillRegistry::hidden_tool_names`] and filtered out by the engine.
//! Tools that were registered by someone else before a skill loaded them
//! (the plan tools of `default_registry`, for instance) are never hidden.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use weaver_core::tool::{Tool, ToolRegistry};
use weaver_memory::SessionStore;
use weaver_tools::{CreatePlanTool, UpdatePlanTool};

use crate::persona::CatalogError;

const KIND: &str = "skill";

#[derive(Clone)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Appended to the system prompt while the skill is enabled.
    pub prompt: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub enabled: bool,
    pub built_in: bool,
}

impl Skill {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            prompt: String::new(),
            tools: Vec::new(),
            enabled: true,
            built_in: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tools", &self.tool_names())
            .field("enabled", &self.enabled)
            .field("built_in", &self.built_in)
            .finish()
    }
}

/// Skills shipped with the engine.
pub fn builtin_skills(sessions: Arc<SessionStore>) -> Vec<Skill> {
    let plan_tracking = Skill::new("plan_tracking", "Plan Tracking")
        .with_description("Draft a plan for confirmation and keep its steps current.")
        .with_prompt(
            "Keep the plan current while executing: mark a step in_progress with \
             update_plan before starting it, and completed or failed right after.",
        )
        .with_tool(Arc::new(CreatePlanTool::new(sessions.clone())))
        .with_tool(Arc::new(UpdatePlanTool::new(sessions)));
    vec![Skill {
        built_in: true,
        ..plan_tracking
    }]
}

#[derive(Default)]
struct SkillState {
    /// Insertion order drives prompt order.
    skills: Vec<Skill>,
    /// Tools of deleted skills.
    retired_tools: HashSet<String>,
    /// Tools this registry put into a tool registry.
    loaded_tools: HashSet<String>,
    /// Skill tools found already registered from elsewhere.
    external_tools: HashSet<String>,
}

impl SkillState {
    fn note_loaded(&mut self, outcome: LoadOutcome) -> usize {
        let added = outcome.added.len();
        self.loaded_tools.extend(outcome.added);
        for name in outcome.skipped {
            if !self.loaded_tools.contains(&name) {
                self.external_tools.insert(name);
            }
        }
        added
    }
}

#[derive(Default)]
pub struct SkillRegistry {
    state: RwLock<SkillState>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with [`builtin_skills`].
    pub fn with_builtins(sessions: Arc<SessionStore>) -> Self {
        let registry = Self::new();
        for mut skill in builtin_skills(sessions) {
            skill.built_in = true;
            registry.write().skills.push(skill);
        }
        registry
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SkillState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SkillState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, mut skill: Skill) -> Result<(), CatalogError> {
        let mut state = self.write();
        if state.skills.iter().any(|s| s.id == skill.id) {
            return Err(CatalogError::AlreadyRegistered {
                kind: KIND,
                id: skill.id,
            });
        }
        skill.built_in = false;
        debug!(skill = %skill.id, tools = skill.tools.len(), "Registered skill");
        state.skills.push(skill);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Skill> {
        self.read().skills.iter().find(|s| s.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Skill> {
        self.read().skills.clone()
    }

    /// Register the tools of every enabled skill. Names already present in
    /// the registry are skipped. Returns how many tools were added.
    pub fn load_tools_into_registry(&self, registry: &ToolRegistry) -> usize {
        let mut state = self.write();
        let tools: Vec<Arc<dyn Tool>> = state
            .skills
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| s.tools.iter().cloned())
            .collect();
        let outcome = load_tools(&tools, registry);
        state.note_loaded(outcome)
    }

    /// Enable a skill and make sure its tools are registered.
    pub fn enable(&self, id: &str, registry: &ToolRegistry) -> Result<usize, CatalogError> {
        let mut state = self.write();
        let skill = find_mut(&mut state.skills, id)?;
        skill.enabled = true;
        let tools = skill.tools.clone();
        let outcome = load_tools(&tools, registry);
        info!(skill = id, "Skill enabled");
        Ok(state.note_loaded(outcome))
    }

    pub fn disable(&self, id: &str) -> Result<(), CatalogError> {
        let mut state = self.write();
        find_mut(&mut state.skills, id)?.enabled = false;
        info!(skill = id, "Skill disabled");
        Ok(())
    }

    /// Change the description and/or prompt of a custom skill.
    pub fn update(
        &self,
        id: &str,
        description: Option<String>,
        prompt: Option<String>,
    ) -> Result<Skill, CatalogError> {
        let mut state = self.write();
        let skill = find_mut(&mut state.skills, id)?;
        if skill.built_in {
            return Err(built_in(id));
        }
        if let Some(description) = description {
            skill.description = description;
        }
        if let Some(prompt) = prompt {
            skill.prompt = prompt;
        }
        Ok(skill.clone())
    }

    /// Remove a custom skill. Its tools stay registered but hidden.
    pub fn delete(&self, id: &str) -> Result<Skill, CatalogError> {
        let mut guard = self.write();
        let state = &mut *guard;
        let idx = state
            .skills
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| not_found(id))?;
        if state.skills[idx].built_in {
            return Err(built_in(id));
        }
        let removed = state.skills.remove(idx);
        state.retired_tools.extend(removed.tool_names());
        Ok(removed)
    }

    /// Prompt delta of every enabled skill, empty when there is none.
    pub fn build_system_prompt(&self) -> String {
        let state = self.read();
        let sections: Vec<String> = state
            .skills
            .iter()
            .filter(|s| s.enabled && !s.prompt.trim().is_empty())
            .map(|s| format!("## {}\n{}", s.name, s.prompt.trim()))
            .collect();
        if sections.is_empty() {
            return String::new();
        }
        format!("\n\n====\n\n# Skills\n\n{}", sections.join("\n\n"))
    }

    /// Tools that belong only to disabled or deleted skills, minus those
    /// registered independently of any skill.
    pub fn hidden_tool_names(&self) -> HashSet<String> {
        let state = self.read();
        let active: HashSet<String> = state
            .skills
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| s.tool_names())
            .collect();
        state
            .skills
            .iter()
            .filter(|s| !s.enabled)
            .flat_map(|s| s.tool_names())
            .chain(state.retired_tools.iter().cloned())
            .filter(|name| !active.contains(name) && !state.external_tools.contains(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct LoadOutcome {
    added: Vec<String>,
    skipped: Vec<String>,
}

fn load_tools(tools: &[Arc<dyn Tool>], registry: &ToolRegistry) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();
    for tool in tools {
        let name = tool.name().to_string();
        if registry.contains(&name) {
            outcome.skipped.push(name);
            continue;
        }
        match registry.register(tool.clone()) {
            Ok(()) => outcome.added.push(name),
            Err(e) => warn!(tool = %name, "Skill tool not loaded: {e}"),
        }
    }
    outcome
}

fn find_mut<'a>(skills: &'a mut [Skill], id: &str) -> Result<&'a mut Skill, CatalogError> {
    skills
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> CatalogError {
    CatalogError::NotFound {
        kind: KIND,
        id: id.to_string(),
    }
}

fn built_in(id: &str) -> CatalogError {
    CatalogError::BuiltIn {
        kind: KIND,
        id: id.to_string(),
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.read().skills.iter().map(|s| s.id.clone()).collect();
        f.debug_struct("SkillRegistry").field("skills", &ids).finish()
    }
}
