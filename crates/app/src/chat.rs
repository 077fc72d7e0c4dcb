//! Relay between the front end and an OpenAI-compatible chat endpoint.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use viseme_core::{ChatConfig, Result, VisemeError};

/// Reply used when the completion carries no message.
pub const FALLBACK_REPLY: &str = "Something went wrong, please try again later.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the assistant's reply to `messages`, if the service produced one.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>>;
}

/// Chat completion over HTTP with bearer authentication.
pub struct HttpChatBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpChatBackend {
    pub fn new(config: &ChatConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| VisemeError::Config(format!("chat client: {err}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .map_err(|err| VisemeError::Chat(err.to_string()))?;

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|err| VisemeError::Chat(err.to_string()))?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content))
    }
}

/// In-memory conversation seeded with a system prompt. Nothing is persisted.
pub struct ChatRelay {
    backend: Arc<dyn ChatBackend>,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatRelay {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: &str) -> Self {
        Self {
            backend,
            history: Mutex::new(vec![ChatMessage::new("system", system_prompt)]),
        }
    }

    /// Sends `message` with the whole conversation and records the reply.
    /// A failed request leaves the history as it was.
    pub async fn ask(&self, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(VisemeError::EmptyInput);
        }

        let mut history = self.history.lock().await;
        history.push(ChatMessage::new("user", message));

        let reply = match self.backend.complete(&history).await {
            Ok(reply) => reply.unwrap_or_else(|| FALLBACK_REPLY.to_string()),
            Err(err) => {
                history.pop();
                return Err(err);
            }
        };

        tracing::info!(chars = reply.chars().count(), "chat reply received");
        history.push(ChatMessage::new("assistant", reply.clone()));
        Ok(reply)
    }

    #[cfg(test)]
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Backend that echoes the last message, or fails when asked to.
    pub(crate) struct EchoBackend {
        pub fail: bool,
        pub silent: bool,
    }

    #[async_trait::async_trait]
    impl ChatBackend for EchoBackend {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
            if self.fail {
                return Err(VisemeError::Chat("connection refused".into()));
            }
            if self.silent {
                return Ok(None);
            }
            Ok(messages.last().map(|m| format!("you said: {}", m.content)))
        }
    }

    fn relay(fail: bool, silent: bool) -> ChatRelay {
        ChatRelay::new(Arc::new(EchoBackend { fail, silent }), "be nice")
    }

    #[tokio::test]
    async fn records_both_sides_of_the_conversation() {
        let relay = relay(false, false);
        let reply = relay.ask("hello").await.unwrap();

        assert_eq!(reply, "you said: hello");
        let history = relay.history().await;
        assert_eq!(
            history,
            vec![
                ChatMessage::new("system", "be nice"),
                ChatMessage::new("user", "hello"),
                ChatMessage::new("assistant", "you said: hello"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_reply_falls_back() {
        let relay = relay(false, true);
        assert_eq!(relay.ask("hello").await.unwrap(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn failure_rolls_back_the_user_turn() {
        let relay = relay(true, false);

        assert!(matches!(relay.ask("hello").await, Err(VisemeError::Chat(_))));
        assert_eq!(relay.history().await.len(), 1);
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let relay = relay(false, false);
        assert!(matches!(relay.ask(" ").await, Err(VisemeError::EmptyInput)));
    }

    #[test]
    fn parses_completion_payload() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{ "choices": [ { "message": { "role": "assistant", "content": "hi" } } ] }"#,
        )
        .unwrap();
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content);

        assert_eq!(content.as_deref(), Some("hi"));
    }
}
