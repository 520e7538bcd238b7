//! Response generation adapters.

use super::{require_key, ResponseGenerator};
use crate::agent::history::{Role, Turn};
use crate::config::LlmConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Groq chat completions (OpenAI-compatible, non-streaming).
pub struct GroqGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    system_prompt: Option<String>,
}

impl GroqGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: require_key("llm", &config.api_key)?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            system_prompt: config.system_prompt.clone(),
        })
    }
}

fn build_messages<'a>(system_prompt: Option<&'a str>, history: &'a [Turn]) -> Vec<ChatMessage<'a>> {
    let system = system_prompt
        .filter(|p| !p.trim().is_empty())
        .map(|content| ChatMessage { role: "system", content });

    system
        .into_iter()
        .chain(history.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }))
        .collect()
}

#[async_trait]
impl ResponseGenerator for GroqGenerator {
    fn name(&self) -> &'static str {
        "groq"
    }

    async fn generate(&self, history: &[Turn]) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(self.system_prompt.as_deref(), history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Generation(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

/// Offline generator that acknowledges the latest user utterance.
pub struct SimulatedGenerator;

#[async_trait]
impl ResponseGenerator for SimulatedGenerator {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn generate(&self, history: &[Turn]) -> Result<String, ProviderError> {
        let latest = history.iter().rev().find(|turn| turn.role == Role::User);
        Ok(match latest {
            Some(turn) => format!("I heard you say: {}", turn.content),
            None => String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::history::ConversationHistory;

    #[test]
    fn test_messages_include_system_prompt_first() {
        let mut history = ConversationHistory::new();
        history.append(Role::User, "hello");
        history.append(Role::Assistant, "hi there");

        let messages = build_messages(Some("Be brief."), history.turns());
        assert_eq!(
            messages,
            vec![
                ChatMessage { role: "system", content: "Be brief." },
                ChatMessage { role: "user", content: "hello" },
                ChatMessage { role: "assistant", content: "hi there" },
            ]
        );
    }

    #[test]
    fn test_blank_system_prompt_skipped() {
        let messages = build_messages(Some("  "), &[]);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_reply_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn test_simulated_generator() {
        let mut history = ConversationHistory::new();
        assert_eq!(SimulatedGenerator.generate(history.turns()).await.unwrap(), "");

        history.append(Role::User, "hello");
        let reply = SimulatedGenerator.generate(history.turns()).await.unwrap();
        assert_eq!(reply, "I heard you say: hello");
    }
}
