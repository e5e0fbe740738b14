use async_trait::async_trait;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::groq;
use serde::Deserialize;
use tracing::{debug, error};

use super::CompletionBackend;
use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::{Message, MessageRole};

const MAX_TOKENS: u64 = 1000;
const TEMPERATURE: f64 = 0.7;

/// Builds a rig [`RigMessage`] history list from stored [`Message`] records.
fn to_rig_history(messages: &[Message]) -> Vec<RigMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            MessageRole::User => RigMessage::user(&m.content),
            MessageRole::Assistant => RigMessage::assistant(&m.content),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Groq chat completions through the rig [`groq::Client`].
/// A fresh agent is built per call so the model can change between requests
/// and the history is replayed from the store each time.
#[derive(Clone)]
pub struct GroqBackend {
    client: Option<groq::Client>,
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    system_prompt: String,
}

impl GroqBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = config.api_key.as_deref().and_then(|key| {
            groq::Client::builder()
                .api_key(key)
                .base_url(&config.base_url)
                .build()
                .map_err(|e| error!("Failed to build Groq client: {e}"))
                .ok()
        });
        Self {
            client,
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    fn not_configured() -> ProviderError {
        ProviderError::NotConfigured {
            message: "Groq client not initialized. Please check your GROQ_API_KEY.".to_string(),
        }
    }
}

#[async_trait]
impl CompletionBackend for GroqBackend {
    fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn complete(&self, model: &str, history: &[Message]) -> Result<String, ProviderError> {
        let client = self.client.as_ref().ok_or_else(Self::not_configured)?;

        // The newest entry is the prompt; everything before it is context.
        let (prompt, context) = history.split_last().ok_or_else(|| ProviderError::Other {
            message: "cannot complete an empty history".to_string(),
        })?;

        let agent = client
            .agent(model)
            .preamble(&self.system_prompt)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_TOKENS)
            .build();

        debug!("Groq request: model={model}, {} message(s)", history.len());
        agent
            .chat(prompt.content.as_str(), to_rig_history(context))
            .await
            .map_err(|e| {
                error!("Groq API error for model {model}: {e}");
                ProviderError::classify(model, e.to_string())
            })
    }

    /// `GET {base_url}/models`, the OpenAI-compatible listing Groq serves.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(Self::not_configured)?;
        let url = format!("{}/models", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ProviderError::classify("", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::classify("", format!("{status}: {body}")));
        }

        let list: ModelList = response.json().await.map_err(|e| ProviderError::Other {
            message: format!("Failed to parse model list: {e}"),
        })?;
        debug!("Groq lists {} model(s)", list.data.len());
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_list_keeps_ids_in_order() {
        let body = r#"{"object":"list","data":[
            {"id":"llama-3.1-8b-instant","object":"model","owned_by":"Meta"},
            {"id":"qwen/qwen3-32b","object":"model","owned_by":"Alibaba Cloud"}
        ]}"#;
        let list: ModelList = serde_json::from_str(body).unwrap();
        let ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["llama-3.1-8b-instant", "qwen/qwen3-32b"]);
    }

    #[tokio::test]
    async fn listing_without_a_key_is_not_configured() {
        let backend = GroqBackend::new(&ProviderConfig { api_key: None, ..Default::default() });
        assert!(!backend.is_ready());
        let err = backend.list_models().await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
    }
}
