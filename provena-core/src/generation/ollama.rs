//! Ollama generative source (`POST /api/generate`, non-streaming).

use super::{ContentSource, GenerationRequest, collapse_whitespace};
use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::record::Record;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Longest field value included in a prompt, in characters.
const MAX_PROMPT_FIELD_CHARS: usize = 420;

pub struct OllamaSource {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

impl OllamaSource {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Request {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the JSON request body for a prompt.
    pub fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "top_p": 0.9,
                "num_ctx": 2048,
            },
        })
    }

    /// Extract the generated text from a response body.
    pub fn parse_response(body: &str) -> Result<String, GenerationError> {
        let json: Value =
            serde_json::from_str(body).map_err(|e| GenerationError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;
        let text = json
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "missing 'response' field".into(),
            })?;
        let text = collapse_whitespace(text);
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Render the populated fields of a record as a bullet list.
fn format_record(record: &Record, fields: &[String]) -> String {
    let lines: Vec<String> = fields
        .iter()
        .filter_map(|f| {
            let value = record.field(f).trim();
            if value.is_empty() {
                return None;
            }
            let clipped: String = value.chars().take(MAX_PROMPT_FIELD_CHARS).collect();
            Some(format!("- {f}: {clipped}"))
        })
        .collect();
    if lines.is_empty() {
        "- record: (no populated fields)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Prompt text for a generation request.
pub fn build_prompt(request: &GenerationRequest<'_>) -> String {
    match request {
        GenerationRequest::Summary {
            stream,
            record,
            fields,
        } => format!(
            "You are assisting archaeological record processing.\n\
             Dataset stream: {stream}\n\
             Write exactly one concise sentence summarizing the record.\n\
             Do not invent facts and keep uncertainty qualifiers if present.\n\
             Record fields:\n{}\n",
            format_record(record, fields)
        ),
        GenerationRequest::Interpretation { stream, summary } => format!(
            "You are assisting archaeological interpretation.\n\
             Dataset stream: {stream}\n\
             Given this prior summary, write exactly one sentence describing \
             what can be interpreted at a high level.\n\
             Do not introduce specific facts not present in the input.\n\
             Prior summary: {summary}\n"
        ),
    }
}

#[async_trait]
impl ContentSource for OllamaSource {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_model(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let body = self.request_body(&build_prompt(request));
        debug!(endpoint = %self.endpoint, model = %self.model, stream = %request.stream(), "Sending generate request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    GenerationError::Request {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| GenerationError::Request {
            message: format!("Failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }
        Self::parse_response(&text)
    }
}
