//! Gemini API client shared by inference providers and pipeline capabilities
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use reqwest::Client;
use std::time::Duration;
use crate::error::OrchestrationError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Anything that turns a prompt into text plus a confidence estimate
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> crate::Result<(String, f32)>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> crate::Result<(String, f32)> {

        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            },
        };

        debug!(model = %self.model, "Calling Gemini API");

        let response = self.client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(
                format!("Gemini API returned {}: {}", status, error_text)
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                OrchestrationError::LlmError("Empty response from Gemini".to_string())
            })?;

        let confidence = calculate_confidence(&gemini_response);

        debug!(confidence, "Gemini response received");

        Ok((answer, confidence))
    }
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
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
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
    content: Content,
    finish_reason: Option<String>,
}

/// Calculate response confidence
fn calculate_confidence(response: &GeminiResponse) -> f32 {
    let Some(candidate) = response.candidates.first() else {
        return 0.5;
    };

    let base_confidence: f32 = 0.85;

    let finish_confidence = match candidate.finish_reason.as_deref() {
        Some("STOP") => 1.0,
        Some("MAX_TOKENS") => 0.8,
        Some("SAFETY") => 0.6,
        _ => 0.7,
    };

    let response_length = candidate
        .content
        .parts
        .first()
        .map(|p| p.text.len())
        .unwrap_or(0);

    let length_confidence = if response_length < 50 {
        0.6
    } else if response_length > 4000 {
        0.8
    } else {
        1.0
    };

    (base_confidence * finish_confidence * length_confidence).clamp(0.5, 0.98)
}
