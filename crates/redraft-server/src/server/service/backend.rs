//! [`TextGenerator`] over an OpenAI-compatible `/v1/chat/completions`
//! endpoint.

use crate::server::config::BackendConfig;
use core::future::Future;
use redraft::{GenerationError, GenerationRequest, TextGenerator};
use serde_json::{Value, json};

const SYSTEM_PROMPT: &str = "You are a careful editor. Reply with the rewritten text only.";

pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    url: String,
    config: BackendConfig,
}

impl OpenAiCompatGenerator {
    pub fn new(config: BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let url = format!("{}/v1/chat/completions", config.base_url);
        Ok(Self {
            client,
            url,
            config,
        })
    }

    fn payload(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.prompt },
            ],
        })
    }

    async fn complete(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.config.api_key)
            .json(&self.payload(&request))
            .send()
            .await
            .map_err(|e| GenerationError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "status {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(e.to_string()))?;
        message_content(&body).ok_or(GenerationError::EmptyOutput)
    }
}

impl TextGenerator for OpenAiCompatGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send {
        self.complete(request)
    }
}

/// Pulls `choices[0].message.content`, joining the text parts when the
/// provider answers with a content array.
fn message_content(body: &Value) -> Option<String> {
    let content = body
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
