//! Message domain types.
//!
//! Two shapes live here: [`MessageEntry`] is what a session records in its
//! log (role, text, timestamp, free-form metadata), and [`Message`] is the
//! chat-completion shape sent to a provider. The engine converts the former
//! into the latter before every LLM call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known metadata keys carried on session message entries.
pub mod meta {
    pub const STEP: &str = "step";
    pub const TYPE: &str = "type";
    pub const TOOL: &str = "tool";
    pub const TOOL_CALL_ID: &str = "tool_call_id";
    pub const TOOL_CALL_NAME: &str = "tool_call_name";
    pub const TOOL_CALL_ARGS: &str = "tool_call_args";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const REASON: &str = "reason";
    pub const CONFIRMED: &str = "confirmed";
    pub const REJECTED: &str = "rejected";
    pub const COMPACTION: &str = "compaction";
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (identity, rules, summaries)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a session's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl MessageEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Attach a metadata value (builder style).
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The tool-call id pairing an assistant entry with its tool entry.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_CALL_ID)
    }

    /// Tool name requested by an assistant entry.
    pub fn tool_call_name(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_CALL_NAME)
    }

    /// Serialized arguments requested by an assistant entry.
    pub fn tool_call_args(&self) -> Option<&str> {
        self.meta_str(meta::TOOL_CALL_ARGS)
    }

    /// Tool name recorded on a tool entry.
    pub fn tool_name(&self) -> Option<&str> {
        self.meta_str(meta::TOOL)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether this is a summary produced by the compactor.
    pub fn is_compaction_summary(&self) -> bool {
        self.role == Role::System && self.flag(meta::COMPACTION)
    }
}

/// A single chat message as sent to an LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_metadata_accessors() {
        let entry = MessageEntry::assistant("calling")
            .with_meta(meta::TOOL_CALL_ID, "call_1")
            .with_meta(meta::TOOL_CALL_NAME, "create_plan")
            .with_meta(meta::TOOL_CALL_ARGS, "{}");
        assert_eq!(entry.tool_call_id(), Some("call_1"));
        assert_eq!(entry.tool_call_name(), Some("create_plan"));
        assert_eq!(entry.tool_call_args(), Some("{}"));
        assert!(!entry.is_compaction_summary());
    }

    #[test]
    fn empty_tool_call_id_reads_as_absent() {
        let entry = MessageEntry::assistant("done").with_meta(meta::TOOL_CALL_ID, "");
        assert_eq!(entry.tool_call_id(), None);
    }

    #[test]
    fn compaction_flag_requires_system_role() {
        let summary = MessageEntry::system("summary").with_meta(meta::COMPACTION, true);
        assert!(summary.is_compaction_summary());
        let user = MessageEntry::user("hi").with_meta(meta::COMPACTION, true);
        assert!(!user.is_compaction_summary());
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("call_9", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert!(json.get("tool_calls").is_none());
    }
}
