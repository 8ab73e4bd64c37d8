//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act inside a workspace:
//! create tables, generate UI schemas, record a plan, and so on. The
//! execution core only sees them through the [`Tool`] trait and the
//! name-keyed [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Short human-readable summary fed back to the model
    #[serde(default)]
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error text when `success` is false
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Fold an execution error into a structured failure.
    pub fn from_error(err: &ToolError) -> Self {
        Self::failure(err.to_string())
    }

    /// The observation text the model sees for this result.
    pub fn observation(&self) -> String {
        if self.success || self.error.is_empty() {
            self.output.clone()
        } else {
            format!("Error: {}", self.error)
        }
    }
}

/// Per-call context handed to a tool.
///
/// Carries the identity of the session the call belongs to and a
/// cancellation token that fires on run cancellation or step timeout.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub workspace_id: String,
    pub user_id: String,
    /// Model-assigned id of the call being executed.
    pub tool_call_id: String,
    /// Active persona allowlist; empty means unrestricted.
    pub tool_filter: Vec<String>,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = id.into();
        self
    }

    pub fn with_tool_filter(mut self, filter: Vec<String>) -> Self {
        self.tool_filter = filter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Name, description, schema and capability flags of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub requires_confirmation: bool,
}

/// The core Tool trait.
///
/// Implementations must be safe to call from any task and should return
/// promptly once `ctx.cancellation` fires.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "create_plan").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether a human must approve the call before it runs.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            requires_confirmation: self.requires_confirmation(),
        }
    }
}

/// A registry of available tools.
///
/// Read-mostly and append-only: tools are registered at startup (or when a
/// skill is enabled) and never removed.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.contains_key(name)
    }

    /// All registered tools, sorted by name.
    pub fn list_all(&self) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Arc<dyn Tool>> = tools.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.list_all().iter().map(|t| t.descriptor()).collect()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_all().iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.list_all().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch to the named tool.
    ///
    /// An unknown name yields `ToolError::NotFound`, whose display text is
    /// `unknown tool: <name>`; `ToolResult::from_error` turns it into the
    /// matching structured failure.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if ctx.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()));
        }
        tool.execute(ctx, arguments).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
