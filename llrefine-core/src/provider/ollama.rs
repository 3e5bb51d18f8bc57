//! Ollama provider - talks to a local Ollama daemon through its native API
//!
//! Chat goes to `/api/chat`, embeddings to `/api/embed`.
//! Default endpoint: http://localhost:11434

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = config.http_client(300)?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ProviderError> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_send(e, self.base_url()))?;

        tracing::debug!(
            path,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ollama response received"
        );

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            if status == 503 {
                return Err(ProviderError::Network(format!(
                    "Ollama at {} is not ready: {}",
                    self.base_url(),
                    text
                )));
            }
            return Err(ProviderError::from_status(status, text));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("Failed to parse Ollama response: {}", e)))
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("llama3:latest")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(self.default_model());

        let api_request = OllamaChatRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: OllamaOptions::from_request(&request),
        };

        tracing::debug!(
            model,
            messages = api_request.messages.len(),
            total_chars = api_request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "ollama chat request"
        );

        let api_response: OllamaChatResponse = self.post("/api/chat", &api_request).await?;

        let prompt_tokens = api_response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = api_response.eval_count.unwrap_or(0);

        Ok(CompletionResponse {
            model: api_response.model,
            content: Some(api_response.message.content),
            finish_reason: FinishReason::from_api(api_response.done_reason.as_deref()),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

impl Embedder for OllamaProvider {
    fn embedding_model(&self) -> &str {
        self.config
            .embedding_model
            .as_deref()
            .unwrap_or_else(|| self.default_model())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = OllamaEmbedRequest {
            model: self.embedding_model().to_string(),
            input: text.to_string(),
        };
        let response: OllamaEmbedResponse = self.post("/api/embed", &request).await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

impl OllamaOptions {
    fn from_request(request: &CompletionRequest) -> Option<Self> {
        if request.temperature.is_none() && request.max_tokens.is_none() {
            return None;
        }
        Some(Self {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_properties() {
        let provider = OllamaProvider::new(
            ProviderConfig::ollama().with_base_url("http://gpu-box:11434/"),
        )
        .unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.default_model(), "llama3:latest");
        assert_eq!(provider.embedding_model(), "llama3:latest");
        assert_eq!(provider.base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn test_options_only_when_set() {
        let request = CompletionRequest::new(vec![]);
        assert!(OllamaOptions::from_request(&request).is_none());

        let request = CompletionRequest::new(vec![]).with_temperature(0.1);
        let options = OllamaOptions::from_request(&request).unwrap();
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("num_predict").is_none());
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{
            "model": "llama3:latest",
            "created_at": "2024-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "PRIORITY: LOW"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 40,
            "eval_count": 8
        }"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "PRIORITY: LOW");
        assert_eq!(parsed.eval_count, Some(8));

        let parsed: OllamaEmbedResponse =
            serde_json::from_str(r#"{"model": "m", "embeddings": [[0.5, 0.25]]}"#).unwrap();
        assert_eq!(parsed.embeddings[0], vec![0.5, 0.25]);
    }
}
