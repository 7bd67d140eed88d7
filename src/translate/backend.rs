use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::{LlmProvider, TranslateConfig};
use crate::error::{BackendError, Result, YeokjaError};

/// Sends one prompt to a language model and returns the raw text of its reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> String;

    async fn complete(&self, prompt: &str) -> std::result::Result<String, BackendError>;

    /// Cheap probe run before a pipeline starts translating.
    async fn check_availability(&self) -> std::result::Result<(), BackendError>;
}

/// Factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    pub fn create_backend(config: &TranslateConfig) -> Result<Arc<dyn LlmBackend>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        match config.provider {
            LlmProvider::OpenAiCompatible => {
                let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                    YeokjaError::Config(format!(
                        "Environment variable {} with the API key is not set",
                        config.api_key_env
                    ))
                })?;
                Ok(Arc::new(OpenAiCompatibleBackend {
                    client,
                    endpoint: config.endpoint.trim_end_matches('/').to_string(),
                    model: config.model.clone(),
                    api_key,
                }))
            }
            LlmProvider::Ollama => Ok(Arc::new(OllamaBackend {
                client,
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                model: config.model.clone(),
            })),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: serde_json::Value,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
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

/// Chat-completions API as served by OpenRouter, OpenAI and friends.
pub struct OpenAiCompatibleBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    fn name(&self) -> String {
        format!("openai-compatible ({})", self.model)
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            response_format: json!({ "type": "json_object" }),
            temperature: 0.0,
        };

        debug!("Sending translation request to: {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/yeokja")
            .header("X-Title", "yeokja")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!("API error {}: {}", status, error_text)));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!("Raw completion: {}", content);
        Ok(content)
    }

    async fn check_availability(&self) -> std::result::Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/models", self.endpoint))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status().is_success() {
            info!("LLM endpoint {} is reachable", self.endpoint);
            Ok(())
        } else {
            Err(BackendError::Transport(format!(
                "LLM endpoint {} answered {}",
                self.endpoint,
                response.status()
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Local Ollama server, `/api/generate` in JSON mode.
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> String {
        format!("ollama ({})", self.model)
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        let url = format!("{}/api/generate", self.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json"
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!("Ollama API error {}: {}", status, error_text)));
        }

        let body: GenerateResponse = response.json().await?;
        debug!("Raw Ollama response: {}", body.response);
        Ok(body.response)
    }

    async fn check_availability(&self) -> std::result::Result<(), BackendError> {
        let response = self
            .client
            .post(format!("{}/api/show", self.endpoint))
            .json(&json!({ "name": self.model }))
            .send()
            .await?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.model);
            Ok(())
        } else {
            Err(BackendError::Transport(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_ollama_backend_needs_no_key() {
        let mut config = Config::default().translate;
        config.provider = LlmProvider::Ollama;
        config.endpoint = "http://localhost:11434/".to_string();
        config.model = "llama3.2".to_string();

        let backend = BackendFactory::create_backend(&config).unwrap();
        assert_eq!(backend.name(), "ollama (llama3.2)");
    }

    #[test]
    fn test_missing_api_key_is_a_config_error() {
        let mut config = Config::default().translate;
        config.api_key_env = "YEOKJA_TEST_KEY_THAT_IS_NEVER_SET".to_string();

        let result = BackendFactory::create_backend(&config);
        assert!(matches!(result, Err(YeokjaError::Config(_))));
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            response_format: json!({ "type": "json_object" }),
            temperature: 0.0,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["response_format"]["type"], "json_object");
    }
}
