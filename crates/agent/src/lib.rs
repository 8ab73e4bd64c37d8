//! The agent execution core of Weaver.
//!
//! The engine drives a model through a **Think → Act → Observe** cycle over
//! one session at a time:
//!
//! 1. **Classify** the first planning message (simple / question / complex)
//! 2. **Assemble** a phase-aware system prompt and the filtered tool set
//! 3. **Think**: ask the LLM adapter for a thought and at most one tool call
//! 4. **Act**: execute the tool, or park it when it needs human approval
//! 5. **Observe**: record the result and loop back to step 2
//!
//! The loop ends on a final answer, an error, a confirmation pause, or the
//! step limit. Every step is surfaced on an [`AgentEvent`] stream.

pub mod classifier;
pub mod compactor;
pub mod engine;
pub mod event;
pub mod persona;
pub mod prompt;
pub mod skill;
pub mod test_helpers;

pub use classifier::{classify_request, count_tokens};
pub use compactor::Compactor;
pub use engine::{AgentEngine, ConfirmOutcome, EngineConfig, RunRequest, PLANNING_TOOLS};
pub use event::{AffectedResource, AgentEvent};
pub use persona::{builtin_personas, CatalogError, Persona, PersonaRegistry, PersonaUpdate};
pub use prompt::{build_web_creator_prompt, persona_system_prompt, PromptTool, ToolCost};
pub use skill::{builtin_skills, Skill, SkillRegistry};
