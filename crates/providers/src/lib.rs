//! Chat-completion providers for Weaver.
//!
//! All providers implement the `weaver_core::Provider` trait. The
//! [`LlmAdapter`] picks one per call from the run's credentials, the engine
//! configuration, or the offline heuristic, and reduces the response to a
//! thought plus at most one tool action.

pub mod adapter;
pub mod heuristic;
pub mod openai_compat;

pub use adapter::{Backend, LlmAdapter, Thought, ToolAction};
pub use heuristic::HeuristicProvider;
pub use openai_compat::OpenAiCompatProvider;
