//! # Weaver Core
//!
//! Domain types, traits, and error definitions for the Weaver agent
//! execution core. This crate has **no framework dependencies**: it defines
//! the session model and the capability traits (tools, chat providers,
//! persisters) that every other crate implements against.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod session;
pub mod persist;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageEntry, MessageToolCall, Role};
pub use provider::{LlmConfig, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use tool::{Tool, ToolContext, ToolDescriptor, ToolRegistry, ToolResult};
pub use session::{
    ComplexityHint, PendingAction, Plan, PlanGroup, PlanStatus, PlanStep, Session, SessionPhase,
    SessionSnapshot, SessionStatus, StepStatus, ToolCallRecord,
};
pub use persist::SessionPersister;
