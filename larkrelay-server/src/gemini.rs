//! Google Gemini completion client.
//!
//! Wraps the `generateContent` endpoint: history turns map 1:1 to `contents`
//! entries and the new prompt is appended as a final user entry. The direct
//! path calls this with an empty history.

use crate::session::Turn;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

const TEMPERATURE: f64 = 0.7;
const MAX_OUTPUT_TOKENS: i64 = 8192;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, PartialEq)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ============================================================================
// GeminiClient
// ============================================================================

/// Client for the Gemini generative-language API.
pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Override the API base URL (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Whether an API key is configured.
    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_contents(history: &[Turn], prompt: &str) -> Vec<Content> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: turn.role.as_str().to_string(),
                parts: vec![Part {
                    text: turn.text.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        });

        contents
    }

    /// Generate a completion for the prompt, continuing the given history.
    pub async fn generate(&self, history: &[Turn], prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .context("Gemini API key not configured")?;

        let request = GenerateContentRequest {
            contents: Self::build_contents(history, prompt),
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({status}): {text}");
        }

        let result: GenerateContentResponse = resp
            .json()
            .await
            .context("Completion response did not decode")?;

        if let Some(err) = result.error {
            anyhow::bail!("Gemini API error: {}", err.message);
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .context("No candidate in Gemini response")?;

        let text = candidate
            .content
            .parts
            .into_iter()
            .next()
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(text)
    }
}
