//! Language model client.
//!
//! [`ModelBackend`] is the seam between the orchestrator and the network.
//! [`GeminiBackend`] talks to the Generative Language `generateContent`
//! endpoint with a blocking client; tests substitute scripted backends.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::types::{ConversationTurn, Role};
use crate::io::config::{GenerationConfig, ModelConfig};

/// One request/response round trip with a chat model.
pub trait ModelBackend {
    /// Send `message` after `history`, constrained by the `system` instruction.
    fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        message: &str,
    ) -> Result<String>;
}

pub struct GeminiBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    generation: GenerationConfig,
}

impl GeminiBackend {
    pub fn new(model: &ModelConfig, generation: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(model.request_timeout_secs))
            .build()
            .context("build http client")?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            model.api_base.trim_end_matches('/'),
            model.name
        );
        Ok(Self {
            client,
            endpoint,
            api_key,
            generation: generation.clone(),
        })
    }

    /// Build from config, reading the API key from the configured variable.
    pub fn from_env(model: &ModelConfig, generation: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&model.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("{} is not set", model.api_key_env))?;
        Self::new(model, generation, api_key)
    }
}

impl ModelBackend for GeminiBackend {
    #[instrument(skip_all, fields(history = history.len(), message_len = message.len()))]
    fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        message: &str,
    ) -> Result<String> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content::text(turn.role, &turn.message))
            .collect();
        contents.push(Content::text(Role::User, message));
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
            contents,
            generation_config: GenerationParams::from(&self.generation),
        };

        debug!(endpoint = %self.endpoint, "sending generateContent request");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .context("send model request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("model request failed with {status}: {}", excerpt(&text));
        }
        let parsed: GenerateResponse = response.json().context("decode model response")?;
        parsed.into_text()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Role, text: &str) -> Self {
        Self {
            role: Some(role.as_str().to_string()),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: String,
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            max_output_tokens: cfg.max_output_tokens,
            response_mime_type: cfg.response_mime_type.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model response contained no candidates"))?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .map(|part| part.text)
            .collect())
    }
}

fn excerpt(text: &str) -> &str {
    const MAX: usize = 500;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
