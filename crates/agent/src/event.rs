//! Events emitted by the engine while a run progresses.
//!
//! Every event carries the session id. Callers adapt them to SSE,
//! WebSocket or plain JSON lines; the engine itself speaks no wire protocol.
//!
//! - `thought`              : the model's reasoning for a step
//! - `tool_call`            : the model asked for a tool
//! - `tool_result`          : a tool finished (or was refused)
//! - `confirmation_required`: the run paused for human approval
//! - `message`              : final answer
//! - `done`                 : terminal, successful path
//! - `error`                : terminal, failed path

use serde::{Deserialize, Serialize};
use weaver_core::tool::ToolResult;

/// Coarse tag for the kind of workspace resource a tool touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedResource {
    Database,
    Workflow,
    UiSchema,
}

impl AffectedResource {
    /// Map a tool name to the resource it affects, if any.
    pub fn resolve(tool_name: &str) -> Option<Self> {
        match tool_name {
            "create_table" | "alter_table" | "insert_data" | "query_data" => Some(Self::Database),
            "create_workflow" | "modify_workflow" | "suggest_workflow" => Some(Self::Workflow),
            "generate_ui_schema" | "modify_ui_schema" => Some(Self::UiSchema),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Workflow => "workflow",
            Self::UiSchema => "ui_schema",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thought {
        session_id: String,
        step: u32,
        content: String,
    },

    ToolCall {
        session_id: String,
        step: u32,
        tool_name: String,
        /// Raw JSON arguments as produced by the model.
        tool_args: String,
    },

    ToolResult {
        session_id: String,
        step: u32,
        tool_name: String,
        tool_result: ToolResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affected_resource: Option<AffectedResource>,
    },

    ConfirmationRequired {
        session_id: String,
        step: u32,
        tool_name: String,
        tool_args: String,
        action_id: String,
        content: String,
    },

    Message {
        session_id: String,
        content: String,
    },

    Done {
        session_id: String,
    },

    Error {
        session_id: String,
        error: String,
    },
}

impl AgentEvent {
    /// Event name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::Message { .. } => "message",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Thought { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::ConfirmationRequired { session_id, .. }
            | Self::Message { session_id, .. }
            | Self::Done { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Error { .. } | Self::ConfirmationRequired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affected_resource_mapping() {
        assert_eq!(AffectedResource::resolve("create_table"), Some(AffectedResource::Database));
        assert_eq!(AffectedResource::resolve("query_data"), Some(AffectedResource::Database));
        assert_eq!(AffectedResource::resolve("suggest_workflow"), Some(AffectedResource::Workflow));
        assert_eq!(AffectedResource::resolve("modify_ui_schema"), Some(AffectedResource::UiSchema));
        assert_eq!(AffectedResource::resolve("create_plan"), None);
        assert_eq!(AffectedResource::UiSchema.as_str(), "ui_schema");
    }

    #[test]
    fn tool_result_serialization() {
        let event = AgentEvent::ToolResult {
            session_id: "s1".into(),
            step: 2,
            tool_name: "create_table".into(),
            tool_result: ToolResult::ok("created"),
            affected_resource: AffectedResource::resolve("create_table"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        assert!(json.contains(r#""affected_resource":"database""#));
        assert!(json.contains(r#""step":2"#));
    }

    #[test]
    fn affected_resource_omitted_when_none() {
        let event = AgentEvent::ToolResult {
            session_id: "s1".into(),
            step: 1,
            tool_name: "create_plan".into(),
            tool_result: ToolResult::ok("ok"),
            affected_resource: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("affected_resource"));
    }

    #[test]
    fn event_type_names() {
        let done = AgentEvent::Done { session_id: "s".into() };
        assert_eq!(done.event_type(), "done");
        assert!(done.is_terminal());

        let err = AgentEvent::Error {
            session_id: "s".into(),
            error: "cancelled".into(),
        };
        assert_eq!(err.event_type(), "error");
        assert_eq!(err.session_id(), "s");

        let thought = AgentEvent::Thought {
            session_id: "s".into(),
            step: 1,
            content: "x".into(),
        };
        assert_eq!(thought.event_type(), "thought");
        assert!(!thought.is_terminal());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"message","session_id":"s9","content":"hi"}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentEvent::Message { session_id, content } => {
                assert_eq!(session_id, "s9");
                assert_eq!(content, "hi");
            }
            _ => panic!("Wrong variant"),
        }
    }
}
