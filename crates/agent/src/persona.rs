//! Persona catalog.
//!
//! A persona narrows what the agent may do (a tool allowlist, empty meaning
//! every tool) and how it introduces itself (a system-prompt delta). The
//! built-in personas are always present and cannot be deleted or edited.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

pub const WEB_CREATOR_ID: &str = "web_creator";

/// Errors raised by the persona and skill catalogs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("{kind} already registered: {id}")]
    AlreadyRegistered { kind: &'static str, id: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("built-in {kind} cannot be modified: {id}")]
    BuiltIn { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub icon: String,
    /// Replaces the default Web Creator prompt when non-empty.
    #[serde(default)]
    pub system_prompt: String,
    /// Tool allowlist; empty means all tools.
    #[serde(default)]
    pub tool_filter: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub built_in: bool,
}

fn default_true() -> bool {
    true
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            category: "custom".into(),
            icon: String::new(),
            system_prompt: String::new(),
            tool_filter: Vec::new(),
            suggestions: Vec::new(),
            enabled: true,
            built_in: false,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tool_filter = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Whether the persona lets the agent use `tool`.
    pub fn allows(&self, tool: &str) -> bool {
        self.tool_filter.is_empty() || self.tool_filter.iter().any(|t| t == tool)
    }

    fn builtin(
        id: &str,
        name: &str,
        description: &str,
        category: &str,
        icon: &str,
        tools: &[&str],
        suggestions: &[&str],
    ) -> Self {
        Self {
            category: category.into(),
            icon: icon.into(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
            built_in: true,
            ..Self::new(id, name, description).with_tools(tools)
        }
    }
}

/// Display fields a caller may change on a custom persona.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub system_prompt: Option<String>,
    pub suggestions: Option<Vec<String>>,
}

/// The personas every registry starts with.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona::builtin(
            WEB_CREATOR_ID,
            "Web Creator",
            "Builds complete web applications: tables, pages, components and logic.",
            "builder",
            "🏗️",
            &[],
            &[
                "Build an employee management system",
                "Add a status column to the orders table",
                "Create a sales dashboard",
            ],
        ),
        Persona::builtin(
            "data_analyst",
            "Data Analyst",
            "Explores workspace data and explains what it finds.",
            "analytics",
            "📊",
            &["get_workspace_info", "query_data", "get_ui_schema"],
            &[
                "Which tables do I have?",
                "How many orders were placed last month?",
            ],
        )
        .with_system_prompt(
            "You are a data analyst working inside a workspace database. \
             Inspect the schema with get_workspace_info, answer with query_data, \
             and report numbers precisely. Never modify data.",
        ),
        Persona::builtin(
            "support_agent",
            "Support Agent",
            "Answers end-user questions using the workspace's records.",
            "support",
            "🎧",
            &["get_workspace_info", "query_data"],
            &["Look up the status of order 1024", "Find the customer named Alice"],
        )
        .with_system_prompt(
            "You are a friendly support agent. Look records up before answering, \
             keep replies short, and say so plainly when something cannot be found.",
        ),
        Persona::builtin(
            "content_writer",
            "Content Writer",
            "Drafts page copy, descriptions and announcements.",
            "content",
            "✍️",
            &["get_workspace_info", "get_ui_schema"],
            &["Write a welcome message for the home page"],
        )
        .with_system_prompt(
            "You are a content writer. Read the app structure when it helps, then \
             write clear, concise copy in the user's language.",
        ),
    ]
}

const KIND: &str = "persona";

pub struct PersonaRegistry {
    personas: RwLock<HashMap<String, Persona>>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonaRegistry {
    /// A registry holding the built-in personas.
    pub fn new() -> Self {
        let personas = builtin_personas()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self {
            personas: RwLock::new(personas),
        }
    }

    /// A registry without any personas.
    pub fn empty() -> Self {
        Self {
            personas: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, mut persona: Persona) -> Result<(), CatalogError> {
        let mut personas = self.personas.write().unwrap_or_else(|e| e.into_inner());
        if personas.contains_key(&persona.id) {
            return Err(CatalogError::AlreadyRegistered {
                kind: KIND,
                id: persona.id,
            });
        }
        persona.built_in = false;
        debug!(persona = %persona.id, "Registered persona");
        personas.insert(persona.id.clone(), persona);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Persona> {
        self.personas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Resolve the persona a session runs under.
    ///
    /// `None` (the default Web Creator behaviour) for no id, an unknown id,
    /// or a disabled persona.
    pub fn resolve(&self, id: Option<&str>) -> Option<Persona> {
        let id = id.filter(|i| !i.is_empty())?;
        self.get(id).filter(|p| p.enabled)
    }

    /// All personas, built-ins first, then by id.
    pub fn list(&self) -> Vec<Persona> {
        let mut all: Vec<Persona> = self
            .personas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.built_in.cmp(&a.built_in).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn list_by_category(&self, category: &str) -> Vec<Persona> {
        self.list()
            .into_iter()
            .filter(|p| p.category == category)
            .collect()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), CatalogError> {
        let mut personas = self.personas.write().unwrap_or_else(|e| e.into_inner());
        let persona = personas.get_mut(id).ok_or_else(|| not_found(id))?;
        persona.enabled = enabled;
        Ok(())
    }

    pub fn update(&self, id: &str, update: PersonaUpdate) -> Result<Persona, CatalogError> {
        let mut personas = self.personas.write().unwrap_or_else(|e| e.into_inner());
        let persona = personas.get_mut(id).ok_or_else(|| not_found(id))?;
        if persona.built_in {
            return Err(CatalogError::BuiltIn {
                kind: KIND,
                id: id.to_string(),
            });
        }
        if let Some(name) = update.name {
            persona.name = name;
        }
        if let Some(description) = update.description {
            persona.description = description;
        }
        if let Some(icon) = update.icon {
            persona.icon = icon;
        }
        if let Some(prompt) = update.system_prompt {
            persona.system_prompt = prompt;
        }
        if let Some(suggestions) = update.suggestions {
            persona.suggestions = suggestions;
        }
        Ok(persona.clone())
    }

    pub fn delete(&self, id: &str) -> Result<Persona, CatalogError> {
        let mut personas = self.personas.write().unwrap_or_else(|e| e.into_inner());
        match personas.get(id) {
            None => Err(not_found(id)),
            Some(p) if p.built_in => Err(CatalogError::BuiltIn {
                kind: KIND,
                id: id.to_string(),
            }),
            Some(_) => personas.remove(id).ok_or_else(|| not_found(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.personas.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(id: &str) -> CatalogError {
    CatalogError::NotFound {
        kind: KIND,
        id: id.to_string(),
    }
}

impl std::fmt::Debug for PersonaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.list().into_iter().map(|p| p.id).collect();
        f.debug_struct("PersonaRegistry").field("personas", &ids).finish()
    }
}
