//! Minimal OpenAI client for our use-case.
//!
//! We only call chat.completions and request plain text; the strict output
//! shape (passage prose, question-set JSON) is enforced downstream by the
//! validator, not by the API. Calls are instrumented and log model names and
//! usage, never contents.
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::TransportError;
use crate::generation::TextSource;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model })
  }

  /// Plain-text chat completion.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_plain(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, TransportError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "lectura-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await
      .map_err(|e| TransportError(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(TransportError(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse =
      res.json().await.map_err(|e| TransportError(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(
        prompt_tokens = ?usage.prompt_tokens,
        completion_tokens = ?usage.completion_tokens,
        total_tokens = ?usage.total_tokens,
        "OpenAI usage"
      );
    }
    let text = body
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default()
      .trim()
      .to_string();

    Ok(text)
  }
}

impl TextSource for OpenAI {
  async fn generate(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, TransportError> {
    self.chat_plain(system, user, temperature).await
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
}
#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
