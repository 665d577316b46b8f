use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::conversation::ConversationTurn;
use crate::config::BotConfig;

/// One-shot text generation from a conversation history.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ConversationTurn],
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    organization: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String, client: reqwest::Client) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            organization: None,
            model,
            client,
        }
    }

    pub fn from_config(config: &BotConfig, client: reqwest::Client) -> Self {
        Self::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            client,
        )
        .with_organization(config.llm_organization.clone())
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|org| !org.trim().is_empty());
        self
    }

    /// Generate a completion using the OpenAI API format
    pub async fn generate(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: None,
            max_tokens: None,
        };

        let mut req = self.client.post(&url).json(&request);

        // Local OpenAI-compatible servers run without a key
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }
        if let Some(org) = self.organization.as_deref() {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        first_choice_content(completion)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ConversationTurn],
    ) -> Result<String> {
        tracing::debug!(
            "Requesting completion from {} with {} turn(s)",
            self.model,
            turns.len()
        );
        self.generate(build_messages(system_instruction, turns))
            .await
    }
}

/// System instruction first, then one named message per turn.
pub fn build_messages(system_instruction: &str, turns: &[ConversationTurn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(Message {
        role: "system".to_string(),
        content: system_instruction.to_string(),
        name: None,
    });
    messages.extend(turns.iter().map(|turn| Message {
        role: turn.role.as_str().to_string(),
        content: turn.text.clone(),
        name: Some(turn.speaker.clone()),
    }));
    messages
}

fn first_choice_content(completion: ChatCompletionResponse) -> Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
}
