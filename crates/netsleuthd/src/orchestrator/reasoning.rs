//! Reasoning Engine Client
//!
//! Generic interface for asking a reasoning engine for the next intent with a
//! strict JSON schema. Real implementation talks to Ollama or an
//! OpenAI-compatible endpoint; the fake replays scripted responses.

use crate::config::EngineConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("engine returned empty response")]
    EmptyResponse,

    /// The engine answered, but not with JSON. Not a transport failure.
    #[error("engine output is not valid JSON: {0}")]
    InvalidOutput(String),
}

impl EngineError {
    /// Transport failures are retried and can make the engine unavailable
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::InvalidOutput(_))
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Call the engine with a prompt and expect a JSON response
    async fn call_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_description: &str,
    ) -> Result<serde_json::Value, EngineError>;
}

/// HTTP reasoning engine client
pub struct HttpReasoningEngine {
    config: EngineConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpReasoningEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        let api_key = config.api_key();

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Check if endpoint is Ollama-style
    fn is_ollama_endpoint(&self) -> bool {
        self.config.endpoint.contains("11434") || self.config.endpoint.contains("ollama")
    }

    fn map_send_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(self.config.timeout_secs)
        } else {
            // without_url keeps query strings (and anything in them) out of logs
            EngineError::HttpError(format!("Request failed: {}", e.without_url()))
        }
    }

    async fn call_ollama(&self, prompt: &str) -> Result<serde_json::Value, EngineError> {
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));

        let request_body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(EngineError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::HttpError(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or(EngineError::EmptyResponse)?;

        parse_engine_text(text)
    }

    async fn call_openai_compatible(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<serde_json::Value, EngineError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint.trim_end_matches('/'));

        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(EngineError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::HttpError(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .ok_or(EngineError::EmptyResponse)?;

        parse_engine_text(text)
    }
}

#[async_trait]
impl ReasoningEngine for HttpReasoningEngine {
    async fn call_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema_description: &str,
    ) -> Result<serde_json::Value, EngineError> {
        if self.is_ollama_endpoint() {
            let full_prompt = format!(
                "{}\n\n{}\n\nYou must respond with valid JSON matching this schema:\n{}",
                system_prompt, user_prompt, schema_description
            );
            match self.call_ollama(&full_prompt).await {
                Ok(json) => return Ok(json),
                Err(e @ EngineError::InvalidOutput(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!("Ollama API failed, trying OpenAI-compatible: {}", e);
                }
            }
        }

        let user_with_schema = format!(
            "{}\n\nYou must respond with valid JSON matching this schema:\n{}",
            user_prompt, schema_description
        );
        self.call_openai_compatible(system_prompt, &user_with_schema).await
    }
}

fn parse_engine_text(text: &str) -> Result<serde_json::Value, EngineError> {
    if text.trim().is_empty() {
        return Err(EngineError::EmptyResponse);
    }
    serde_json::from_str(text.trim())
        .map_err(|e| EngineError::InvalidOutput(format!("{} (got {} chars)", e, text.len())))
}

/// Fake reasoning engine for testing.
///
/// Responses are consumed in order; the last one repeats forever.
pub struct FakeReasoningEngine {
    responses: Mutex<Vec<Result<serde_json::Value, EngineError>>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeReasoningEngine {
    pub fn new(responses: Vec<Result<serde_json::Value, EngineError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Scripted successful replies
    pub fn scripted(replies: Vec<serde_json::Value>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn always_valid(json: serde_json::Value) -> Self {
        Self::new(vec![Ok(json)])
    }

    pub fn always_error(error: EngineError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// User prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningEngine for FakeReasoningEngine {
    async fn call_json(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _schema_description: &str,
    ) -> Result<serde_json::Value, EngineError> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());

        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Err(EngineError::EmptyResponse),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_engine_sequence() {
        let engine = FakeReasoningEngine::new(vec![
            Ok(serde_json::json!({"response": 1})),
            Err(EngineError::Timeout(30)),
            Ok(serde_json::json!({"response": 3})),
        ]);

        assert_eq!(engine.call_json("", "a", "").await.unwrap()["response"], 1);
        assert!(engine.call_json("", "b", "").await.is_err());
        assert_eq!(engine.call_json("", "c", "").await.unwrap()["response"], 3);
        // Last response repeats
        assert_eq!(engine.call_json("", "d", "").await.unwrap()["response"], 3);
        assert_eq!(engine.call_count(), 4);
        assert_eq!(engine.prompts()[1], "b");
    }

    #[test]
    fn test_error_classification() {
        assert!(EngineError::Timeout(5).is_transport());
        assert!(EngineError::HttpError("503".to_string()).is_transport());
        assert!(!EngineError::InvalidOutput("x".to_string()).is_transport());
    }

    #[test]
    fn test_parse_engine_text() {
        assert!(parse_engine_text(r#" {"kind": "clarification"} "#).is_ok());
        assert!(matches!(parse_engine_text("I think"), Err(EngineError::InvalidOutput(_))));
        assert_eq!(parse_engine_text("  "), Err(EngineError::EmptyResponse));
    }

    #[test]
    fn test_endpoint_detection() {
        let engine = HttpReasoningEngine::new(EngineConfig::default()).unwrap();
        assert!(engine.is_ollama_endpoint());

        let engine = HttpReasoningEngine::new(EngineConfig {
            endpoint: "https://llm.internal.example".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(!engine.is_ollama_endpoint());
    }
}
