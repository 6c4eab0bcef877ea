//! LLM HTTP Gateway
//!
//! Gemini-style generateContent client. System and user prompts are joined
//! into one content part; generation settings map onto the API's
//! generationConfig. Transient failures retry with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::gateways::{GatewayError, GatewayResult, GenerationOptions, LlmGateway};
use crate::infrastructure::retry::{with_retry, RetryConfig};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    /// API base; defaults to the public endpoint. Deployments using a cloud
    /// project route through their regional endpoint instead.
    pub api_base: Option<String>,
    pub project_id: Option<String>,
    pub location: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// HTTP LLM gateway with bounded retry.
pub struct HttpLlmGateway {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl HttpLlmGateway {
    pub fn new(config: LlmConfig) -> Self {
        let endpoint = match (&config.api_base, &config.project_id) {
            (Some(base), _) => format!("{}/models/{}:generateContent", base, config.model),
            (None, Some(project)) => format!(
                "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
                loc = config.location,
                model = config.model,
            ),
            (None, None) => format!(
                "{DEFAULT_API_BASE}/models/{}:generateContent",
                config.model
            ),
        };

        Self {
            client: Client::new(),
            config,
            endpoint,
        }
    }

    async fn call_once(&self, full_prompt: &str, options: GenerationOptions) -> GatewayResult<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: full_prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.query(&[("key", key.as_str())]);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("LLM request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GatewayError::Llm(format!("LLM service returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::MalformedResponse(format!(
                "LLM service rejected the request ({status}): {body}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(format!("bad LLM response: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        debug!(chars = text.len(), "LLM response received");
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
    ) -> GatewayResult<String> {
        let full_prompt = if system_prompt.is_empty() {
            user_prompt.to_string()
        } else {
            format!("{system_prompt}\n\n{user_prompt}")
        };

        with_retry(&self.config.retry, "llm_generate", || {
            self.call_once(&full_prompt, options)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_base: Option<&str>, project: Option<&str>) -> LlmConfig {
        LlmConfig {
            model: "gemini-2.5-flash-lite".to_string(),
            api_key: None,
            api_base: api_base.map(String::from),
            project_id: project.map(String::from),
            location: "us-central1".to_string(),
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn explicit_api_base_wins() {
        let gateway = HttpLlmGateway::new(config(Some("http://localhost:9000/v1"), None));
        assert_eq!(
            gateway.endpoint,
            "http://localhost:9000/v1/models/gemini-2.5-flash-lite:generateContent"
        );
    }

    #[test]
    fn project_routes_through_regional_endpoint() {
        let gateway = HttpLlmGateway::new(config(None, Some("my-project")));
        assert!(gateway.endpoint.contains("us-central1-aiplatform.googleapis.com"));
        assert!(gateway.endpoint.contains("projects/my-project"));
    }

    #[test]
    fn default_endpoint_is_the_public_api() {
        let gateway = HttpLlmGateway::new(config(None, None));
        assert!(gateway
            .endpoint
            .starts_with("https://generativelanguage.googleapis.com"));
    }

    #[test]
    fn request_serializes_generation_config() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "hi".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: 256,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        let temperature = json["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.2).abs() < 1e-6);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
    }
}
