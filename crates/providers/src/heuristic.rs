//! Offline fallback used when no credentials are configured.
//!
//! Always answers with a deterministic acknowledgement and never requests a
//! tool, so runs terminate after one step with a final message.

use async_trait::async_trait;
use weaver_core::error::ProviderError;
use weaver_core::message::{Message, Role};
use weaver_core::provider::{ProviderRequest, ProviderResponse};

pub const HEURISTIC_EMPTY_REPLY: &str = "I need more information to help you.";

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicProvider;

impl HeuristicProvider {
    pub fn new() -> Self {
        Self
    }

    /// The reply for a given conversation.
    pub fn reply(messages: &[Message]) -> String {
        let latest = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty());

        match latest {
            None => HEURISTIC_EMPTY_REPLY.to_string(),
            Some(request) => format!(
                "I understand you want help with: {request:?}. No language model is configured, \
                 so I can only acknowledge the request. Set an API key (WEAVER_API_KEY or \
                 OPENAI_API_KEY) for full AI-powered generation; an engine base URL is only \
                 used together with a key."
            ),
        }
    }
}

#[async_trait]
impl weaver_core::Provider for HeuristicProvider {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(Self::reply(&request.messages)),
            usage: None,
            model: "keyword-based".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::Provider;

    fn request(messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: "any".into(),
            messages,
            temperature: 0.2,
            max_tokens: None,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn empty_conversation_asks_for_more() {
        let resp = HeuristicProvider.complete(request(vec![])).await.unwrap();
        assert_eq!(resp.message.content, HEURISTIC_EMPTY_REPLY);
        assert!(resp.message.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn reply_is_deterministic_and_never_calls_tools() {
        let msgs = vec![Message::system("sys"), Message::user("build a crm")];
        let a = HeuristicProvider.complete(request(msgs.clone())).await.unwrap();
        let b = HeuristicProvider.complete(request(msgs)).await.unwrap();
        assert_eq!(a.message.content, b.message.content);
        assert!(a.message.content.contains("build a crm"));
        assert!(a.message.tool_calls.is_empty());
    }

    #[test]
    fn reply_says_a_base_url_needs_a_key() {
        let reply = HeuristicProvider::reply(&[Message::user("build a crm")]);
        assert!(reply.contains("API key"));
        assert!(reply.contains("only used together with a key"));
    }
}
