//! Chat-completion generation against an OpenAI-compatible API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ConfigError, GenerationError};
use crate::models::{GenerationConfig, require_credential};

/// Produces candidate answers for a fully rendered prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    /// All candidate replies, in provider order. May be empty.
    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GenerationError>;
}

pub type SharedGenerator = Arc<dyn Generator>;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {base_url}/chat/completions` with bearer auth.
pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Read the key from `config.api_key_env`; fails before any request if unset.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let api_key = require_credential(&config.api_key_env)?;
        Self::new(config, api_key).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<String>, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GenerationError::ConnectionError(e.to_string())
                } else {
                    GenerationError::RequestError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let replies = extract_replies(parsed);
        debug!(model = %self.model, replies = replies.len(), "chat completion");
        Ok(replies)
    }
}

fn extract_replies(response: ChatResponse) -> Vec<String> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|m| m.content))
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Generator returning scripted results and recording prompts.
    pub struct ScriptedGenerator {
        result: Box<dyn Fn() -> Result<Vec<String>, GenerationError> + Send + Sync>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn replying(reply: &str) -> Self {
            let reply = reply.to_string();
            Self::with(move || Ok(vec![reply.clone()]))
        }

        pub fn silent() -> Self {
            Self::with(|| Ok(Vec::new()))
        }

        pub fn failing(status: u16) -> Self {
            Self::with(move || {
                Err(GenerationError::ServerError {
                    status,
                    message: "provider unavailable".to_string(),
                })
            })
        }

        fn with(
            result: impl Fn() -> Result<Vec<String>, GenerationError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                result: Box::new(result),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<Vec<String>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.result)()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_fails_before_request() {
        let config = GenerationConfig {
            api_key_env: "RAGQA_TEST_NO_OPENAI_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiGenerator::from_config(&config),
            Err(ConfigError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_request_body_uses_fixed_parameters() {
        let generator =
            OpenAiGenerator::new(&GenerationConfig::default(), "sk-test".to_string()).unwrap();
        let body = generator.request_body("Hello?");
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 500);
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(body["messages"][0]["content"], "Hello?");
    }

    #[test]
    fn test_extract_replies_keeps_all_candidates() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [
                { "message": { "role": "assistant", "content": "Paris." } },
                { "message": { "role": "assistant", "content": "It is Paris." } },
                { "message": { "role": "assistant", "content": null } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_replies(response), vec!["Paris.", "It is Paris."]);
    }

    #[test]
    fn test_no_choices_is_empty() {
        let response: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(extract_replies(response).is_empty());
    }
}
