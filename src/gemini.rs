//! Gemini API client
//!
//! Implements `LanguageModel` over the generateContent endpoint.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::LedgerError;
use crate::model::{LanguageModel, Prompt};
use crate::session::Role;
use crate::Result;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Client for the configured model; a missing key fails on first use.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.gemini_api_key.clone().unwrap_or_default(),
            config.model_timeout,
        )?
        .with_model(config.gemini_model.clone())
        .with_base_url(config.gemini_base_url.clone()))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(LedgerError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = build_request(prompt);

        debug!(model = %self.model, turns = prompt.turns.len(), json = prompt.json_output, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                LedgerError::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(LedgerError::Transport(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let body = response.text().await.map_err(LedgerError::from)?;
        extract_text(&body)
    }
}

fn build_request(prompt: &Prompt) -> GeminiRequest {
    GeminiRequest {
        contents: prompt
            .turns
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: turn.content.clone(),
                }],
            })
            .collect(),
        generation_config: GenerationConfig {
            temperature: prompt.temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 1024,
            response_mime_type: prompt
                .json_output
                .then(|| "application/json".to_string()),
        },
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: prompt.system.clone(),
            }],
        },
    }
}

/// Pull the first candidate's text out of a generateContent response body.
fn extract_text(body: &str) -> Result<String> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| LedgerError::parse(format!("Gemini response not understood: {}", e), body))?;

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| LedgerError::parse("No candidates in Gemini response", body))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        debug!(finish_reason = reason, "Gemini candidate finished");
    }

    let text: String = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LedgerError::parse("Empty response from Gemini", body));
    }

    Ok(text.trim().to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Turn;

    #[test]
    fn test_request_serialization() {
        let mut prompt = Prompt::json("Convert to JSON", "Income 500 from Ram");
        prompt.turns.insert(0, Turn::assistant("{\"intent\":\"greeting\",\"payload\":\"Hi\"}"));

        let json = serde_json::to_value(build_request(&prompt)).unwrap();
        assert_eq!(json["contents"][0]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["text"], "Income 500 from Ram");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Convert to JSON");
    }

    #[test]
    fn test_plain_prompt_has_no_mime_type() {
        let json = serde_json::to_value(build_request(&Prompt::text("s", "u"))).unwrap();
        assert!(json["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"Ram"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(extract_text(body).unwrap(), "Hello Ram");
    }

    #[test]
    fn test_extract_text_rejects_empty_candidates() {
        let err = extract_text(r#"{"candidates":[]}"#).unwrap_err();
        assert!(matches!(err, LedgerError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new("", Duration::from_secs(1)).unwrap();
        let result = client.complete(&Prompt::text("s", "what is RSI?")).await;

        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("GEMINI_API_KEY"));
    }
}
