//! LLM Adapter: one call in, one thought (and at most one action) out.
//!
//! Backend selection per call, first match wins:
//! 1. run-level credentials (api key or base URL present)
//! 2. an explicitly injected provider
//! 3. engine-level credentials (api key present)
//! 4. the offline heuristic

use std::sync::Arc;
use tracing::{debug, warn};
use weaver_core::error::ProviderError;
use weaver_core::message::Message;
use weaver_core::provider::{LlmConfig, Provider, ProviderRequest, ToolDefinition};

use crate::heuristic::HeuristicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Provider tool-call ids longer than this are cut.
pub const MAX_TOOL_CALL_ID_LEN: usize = 40;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAction {
    /// Provider-assigned call id, possibly empty.
    pub id: String,
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// The outcome of one model round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thought {
    pub text: String,
    pub action: Option<ToolAction>,
}

impl Thought {
    pub fn is_final(&self) -> bool {
        self.action.is_none()
    }
}

/// Which backend a call will be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Run { base_url: String, model: String },
    Injected { name: String },
    Engine { base_url: String, model: String },
    Heuristic,
}

pub struct LlmAdapter {
    engine: LlmConfig,
    temperature: f32,
    max_tokens: Option<u32>,
    injected: Option<Arc<dyn Provider>>,
    engine_client: Option<Arc<OpenAiCompatProvider>>,
}

impl LlmAdapter {
    pub fn new(engine: LlmConfig) -> Self {
        let engine_client = engine.has_api_key().then(|| {
            Arc::new(OpenAiCompatProvider::new(
                "openai",
                engine.base_url_or_default(),
                engine.api_key.clone().unwrap_or_default(),
            ))
        });
        Self {
            engine,
            temperature: 0.2,
            max_tokens: Some(8192),
            injected: None,
            engine_client,
        }
    }

    /// Route calls without run-level credentials to `provider`.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.injected = Some(provider);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = (max_tokens > 0).then_some(max_tokens);
        self
    }

    /// Decide which backend serves a call with the given run credentials.
    pub fn backend(&self, run: Option<&LlmConfig>) -> Backend {
        if let Some(run) = run.filter(|r| r.has_api_key() || r.has_base_url()) {
            return Backend::Run {
                base_url: run.base_url_or_default(),
                model: run.model_or_default(),
            };
        }
        if let Some(provider) = &self.injected {
            return Backend::Injected {
                name: provider.name().to_string(),
            };
        }
        if self.engine_client.is_some() {
            return Backend::Engine {
                base_url: self.engine.base_url_or_default(),
                model: self.engine.model_or_default(),
            };
        }
        Backend::Heuristic
    }

    /// Ask the model for its next thought.
    ///
    /// Network and decode errors propagate; the heuristic never fails.
    pub async fn think(
        &self,
        run: Option<&LlmConfig>,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<Thought, ProviderError> {
        let backend = self.backend(run);
        let (provider, model): (Arc<dyn Provider>, String) = match &backend {
            Backend::Run { base_url, model } => {
                let key = run.and_then(|r| r.api_key.clone()).unwrap_or_default();
                let client: Arc<dyn Provider> =
                    Arc::new(OpenAiCompatProvider::new("openai", base_url.clone(), key));
                (client, model.clone())
            }
            Backend::Injected { .. } => match &self.injected {
                Some(p) => (p.clone(), self.model_for(run)),
                None => (Self::heuristic(), String::new()),
            },
            Backend::Engine { model, .. } => match &self.engine_client {
                Some(client) => (client.clone() as Arc<dyn Provider>, model.clone()),
                None => (Self::heuristic(), String::new()),
            },
            Backend::Heuristic => (Self::heuristic(), "keyword-based".into()),
        };

        debug!(backend = provider.name(), model = %model, tools = tools.len(), "LLM think");

        let request = ProviderRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        };
        let response = provider.complete(request).await?;
        Ok(Self::reduce(response.message))
    }

    fn heuristic() -> Arc<dyn Provider> {
        Arc::new(HeuristicProvider)
    }

    fn model_for(&self, run: Option<&LlmConfig>) -> String {
        run.and_then(|r| r.model.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.engine.model_or_default())
    }

    /// Reduce a provider message to a thought with at most one action.
    pub fn reduce(message: Message) -> Thought {
        let mut calls = message.tool_calls.into_iter();
        let action = calls.next().map(|call| ToolAction {
            id: call.id.chars().take(MAX_TOOL_CALL_ID_LEN).collect(),
            name: call.name,
            arguments: if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            },
        });
        let dropped = calls.count();
        if dropped > 0 {
            warn!(dropped, "Model returned several tool calls, keeping the first");
        }

        let mut text = message.content.trim().to_string();
        if text.is_empty() {
            if let Some(action) = &action {
                text = format!("I'll call the {} tool to proceed.", action.name);
            }
        }
        Thought { text, action }
    }
}

impl std::fmt::Debug for LlmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAdapter")
            .field("engine", &self.engine)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("injected", &self.injected.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::message::MessageToolCall;

    fn key_config(key: &str) -> LlmConfig {
        LlmConfig {
            api_key: Some(key.into()),
            ..LlmConfig::default()
        }
    }

    fn call(id: &str, name: &str, args: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn no_credentials_selects_heuristic() {
        let adapter = LlmAdapter::new(LlmConfig::default());
        assert_eq!(adapter.backend(None), Backend::Heuristic);
    }

    #[test]
    fn run_model_only_falls_through() {
        let adapter = LlmAdapter::new(LlmConfig::default());
        let run = LlmConfig {
            model: Some("gpt-4o-mini".into()),
            ..LlmConfig::default()
        };
        assert_eq!(adapter.backend(Some(&run)), Backend::Heuristic);
    }

    #[test]
    fn run_credentials_win_over_engine() {
        let adapter = LlmAdapter::new(key_config("engine-key"));
        let run = LlmConfig {
            base_url: Some("http://localhost:11434/v1".into()),
            ..LlmConfig::default()
        };
        assert_eq!(
            adapter.backend(Some(&run)),
            Backend::Run {
                base_url: "http://localhost:11434/v1".into(),
                model: "gpt-4o".into(),
            }
        );
        assert!(matches!(adapter.backend(None), Backend::Engine { .. }));
    }

    #[test]
    fn engine_base_url_without_key_stays_heuristic() {
        let adapter = LlmAdapter::new(LlmConfig {
            api_key: None,
            base_url: Some("http://localhost:11434/v1".into()),
            model: Some("llama3".into()),
        });
        assert_eq!(adapter.backend(None), Backend::Heuristic);
    }

    #[tokio::test]
    async fn engine_base_url_without_key_answers_offline() {
        let adapter = LlmAdapter::new(LlmConfig {
            api_key: None,
            base_url: Some("http://127.0.0.1:1".into()),
            model: None,
        });
        let thought = adapter
            .think(None, vec![Message::user("hello")], vec![])
            .await
            .unwrap();
        assert!(thought.is_final());
        assert!(thought.text.contains("only used together with a key"));
    }

    #[test]
    fn injected_provider_beats_engine_but_not_run() {
        let adapter =
            LlmAdapter::new(key_config("engine-key")).with_provider(Arc::new(HeuristicProvider));
        assert_eq!(
            adapter.backend(None),
            Backend::Injected { name: "heuristic".into() }
        );
        assert!(matches!(adapter.backend(Some(&key_config("run"))), Backend::Run { .. }));
    }

    #[test]
    fn reduce_keeps_first_action_and_truncates_id() {
        let mut msg = Message::assistant("");
        msg.tool_calls = vec![
            call(&"x".repeat(64), "create_plan", r#"{"title":"t"}"#),
            call("call_2", "update_plan", "{}"),
        ];
        let thought = LlmAdapter::reduce(msg);
        let action = thought.action.unwrap();
        assert_eq!(action.name, "create_plan");
        assert_eq!(action.id.len(), MAX_TOOL_CALL_ID_LEN);
        assert_eq!(thought.text, "I'll call the create_plan tool to proceed.");
    }

    #[test]
    fn reduce_keeps_prose_with_action() {
        let mut msg = Message::assistant("  Checking the workspace.  ");
        msg.tool_calls = vec![call("c1", "get_workspace_info", "")];
        let thought = LlmAdapter::reduce(msg);
        assert_eq!(thought.text, "Checking the workspace.");
        assert_eq!(thought.action.unwrap().arguments, "{}");
    }

    #[test]
    fn reduce_without_calls_is_final() {
        let thought = LlmAdapter::reduce(Message::assistant("All done."));
        assert!(thought.is_final());
        assert_eq!(thought.text, "All done.");
    }

    #[tokio::test]
    async fn heuristic_think_is_final_answer() {
        let adapter = LlmAdapter::new(LlmConfig::default());
        let thought = adapter
            .think(None, vec![Message::user("hello")], vec![])
            .await
            .unwrap();
        assert!(thought.is_final());
        assert!(!thought.text.is_empty());
    }

    #[tokio::test]
    async fn engine_key_with_bad_endpoint_errors() {
        let adapter = LlmAdapter::new(LlmConfig {
            api_key: Some("sk-test".into()),
            base_url: Some("http://127.0.0.1:1".into()),
            model: None,
        });
        let err = adapter
            .think(None, vec![Message::user("hello")], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_) | ProviderError::Timeout(_)));
    }
}
