use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("TENSORZERO_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_key: std::env::var("TENSORZERO_API_KEY").ok(),
            function_name: std::env::var("TENSORZERO_FUNCTION").ok(),
            model: std::env::var("TENSORZERO_MODEL").ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub text: String,
}

enum Backend {
    Gateway { http: Client, config: LlmConfig },
    /// Canned reply for tests and air-gapped runs.
    Stub { reply: String },
}

pub struct LlmClient {
    backend: Backend,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            backend: Backend::Gateway {
                http: build_client(),
                config,
            },
        }
    }

    pub fn stubbed(reply: impl Into<String>) -> Self {
        Self {
            backend: Backend::Stub {
                reply: reply.into(),
            },
        }
    }

    pub async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        let (http, config) = match &self.backend {
            Backend::Stub { reply } => {
                return Ok(LlmResponse {
                    text: reply.clone(),
                });
            }
            Backend::Gateway { http, config } => (http, config),
        };

        let gateway = config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(LlmError::MissingGateway);
        }

        let body = ChatRequest {
            function_name: config
                .function_name
                .as_deref()
                .unwrap_or("product_normalization")
                .to_string(),
            model_name: config.model.clone(),
            input: ChatInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = http.post(format!("{gateway}/inference")).json(&body);
        if let Some(key) = &config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GatewayResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .map(|item| item.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))?;

        Ok(LlmResponse { text })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    input: ChatInput,
}

#[derive(Debug, Serialize)]
struct ChatInput {
    messages: Vec<LlmMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    r#type: String,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_backend_echoes_reply() {
        let client = LlmClient::stubbed("{\"name\":\"x\"}");
        let response = client
            .chat(&[LlmMessage {
                role: "user".into(),
                content: "ignored".into(),
            }])
            .await
            .expect("stub never fails");
        assert_eq!(response.text, "{\"name\":\"x\"}");
    }
}
