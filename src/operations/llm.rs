//! Chat-completion client
//!
//! Used by operations to generate questions. Replies are requested as JSON
//! objects; callers pick one field and fall back to the raw text.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::BackendConfig;
use crate::http::{HttpClient, RetryPolicy};

/// One chat message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion collaborator
#[derive(Clone)]
pub struct LlmClient {
    http: HttpClient,
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn from_config(backends: &BackendConfig) -> Result<Self> {
        let mut http = HttpClient::with_timeout(backends.request_timeout_secs)?.retry(
            RetryPolicy::new(
                backends.retries,
                Duration::from_secs(backends.retry_delay_secs),
            ),
        );
        if let Some(app_id) = &backends.llm_app_id {
            http = http.default_header("app-id", app_id)?;
        }
        if let Some(secret) = &backends.llm_app_secret {
            http = http.default_header("app-secret", secret)?;
        }

        Ok(Self {
            http,
            url: backends.llm_url.clone(),
            model: backends.llm_model.clone(),
            max_tokens: 512,
            temperature: 0.0,
        })
    }

    /// Request body for a completion
    pub fn request_body(&self, messages: &[ChatMessage], user: &str) -> Value {
        json!({
            "frequency_penalty": 0,
            "max_tokens": self.max_tokens,
            "messages": messages,
            "model": self.model,
            "n": 1,
            "presence_penalty": 0,
            "stop": ["##STOP##"],
            "temperature": self.temperature,
            "top_p": 1.0,
            "user": user,
            "response_format": {"type": "json_object"},
        })
    }

    /// Run a completion and return the concatenated message content
    pub async fn complete(&self, messages: &[ChatMessage], user: &str) -> Result<String> {
        let response = self
            .http
            .post_json(&self.url, &self.request_body(messages, user))
            .await?;
        let body: Value = response.json()?;
        let content = completion_text(&body)
            .ok_or_else(|| anyhow!("Completion response has no choices: {}", response.body))?;
        debug!("Completion: {}", content);
        Ok(content)
    }

    /// Complete and read `key` from the JSON reply
    pub async fn ask_for(&self, messages: &[ChatMessage], user: &str, key: &str) -> Result<String> {
        let reply = self.complete(messages, user).await?;
        Ok(json_reply_field(&reply, Some(key)))
    }
}

/// Concatenated `choices[].message.content`
pub fn completion_text(body: &Value) -> Option<String> {
    let choices = body.get("choices")?.as_array()?;
    if choices.is_empty() {
        return None;
    }
    Some(
        choices
            .iter()
            .filter_map(|c| c.pointer("/message/content").and_then(Value::as_str))
            .collect(),
    )
}

/// Field of a JSON-object reply.
///
/// With `key` the named field is taken, otherwise the first field. Replies
/// that are not JSON objects come back unchanged.
pub fn json_reply_field(reply: &str, key: Option<&str>) -> String {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(reply) else {
        return reply.to_string();
    };

    let value = match key {
        Some(key) => map.get(key).or_else(|| map.values().next()),
        None => map.values().next(),
    };

    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => reply.to_string(),
    }
}
