//! Structured extraction via an LLM service speaking the chat-completions
//! protocol in JSON mode.
//!
//! The service is treated as an unreliable black box: temperature 0, a fixed
//! response envelope, and a bounded retry protocol that shrinks the payload
//! on every rate-limit hit.

pub mod retry;
pub mod schema;
pub mod window;

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ExtractError;

pub use retry::{MAX_ATTEMPTS, RetryState, backoff_delay, shrink_factor};
pub use schema::{ADVICE_SCHEMA, ExtractionSchema, LINKAGE_FIELD, REMITTANCE_SCHEMA};
pub use window::{financial_window, truncate_chars};

/// Outcome of one extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    /// Whether the input actually was the kind of document the schema
    /// describes.
    pub is_relevant: bool,
    /// Service-reported confidence in [0, 1].
    pub confidence: f32,
    /// Canonical field name → extracted value. Null/empty values are dropped
    /// during parsing, so every entry here is populated.
    pub fields: BTreeMap<String, String>,
}

/// Seam for the extraction service.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<ExtractionResult, ExtractError>;
}

/// Extractor backed by an OpenAI-compatible chat-completions endpoint.
pub struct RestExtractor {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl RestExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.extract_base_url.trim_end_matches('/').to_string(),
            api_key: config.extract_api_key.clone(),
            model: config.extract_model.clone(),
        }
    }

    fn system_prompt() -> &'static str {
        "You are a strict information extraction engine for bank remittance \
         documents. You only output JSON matching the requested shape. You \
         never fabricate values: a field you cannot find in the input is null."
    }

    fn user_prompt(text: &str, schema: &ExtractionSchema) -> String {
        let field_list = schema
            .fields
            .iter()
            .map(|f| format!("  - {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "The input below is {label}.\n\n\
             Return a JSON object with exactly these keys:\n\
             - \"IsRelevant\": boolean, true only if the input really is {label}.\n\
             - \"Confidence\": number in [0,1].\n\
             - \"Fields\": object mapping each of the field names below to its \
             extracted string value, or null when absent. Do not invent values.\n\n\
             Field names:\n{field_list}\n\n\
             Guidance:\n{guidance}\n\n\
             Input:\n{text}",
            label = schema.label,
            guidance = schema.guidance,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Shape the model is instructed to emit inside the message content.
#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(rename = "IsRelevant", default)]
    is_relevant: bool,
    #[serde(rename = "Confidence", default)]
    confidence: f32,
    #[serde(
        rename = "Fields",
        alias = "FinancialFields",
        default
    )]
    fields: BTreeMap<String, Option<serde_json::Value>>,
}

impl ExtractionPayload {
    fn into_result(self) -> ExtractionResult {
        let mut fields = BTreeMap::new();
        for (name, value) in self.fields {
            let Some(value) = value else { continue };
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            let text = text.trim().to_string();
            if !text.is_empty() {
                fields.insert(name, text);
            }
        }
        ExtractionResult {
            is_relevant: self.is_relevant,
            confidence: self.confidence.clamp(0.0, 1.0),
            fields,
        }
    }
}

#[async_trait]
impl Extractor for RestExtractor {
    async fn extract(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<ExtractionResult, ExtractError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": Self::system_prompt() },
                { "role": "user", "content": Self::user_prompt(text, schema) },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ExtractError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ExtractError::AuthFailed);
            }
            status if !status.is_success() => {
                let detail = response.text().await.unwrap_or_default();
                return Err(ExtractError::RequestFailed(format!(
                    "status {status}: {detail}"
                )));
            }
            _ => {}
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::InvalidResponse(e.to_string()))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ExtractError::InvalidResponse("empty choices".into()))?;

        let payload: ExtractionPayload = serde_json::from_str(content)
            .map_err(|e| ExtractError::InvalidResponse(format!("bad payload JSON: {e}")))?;
        Ok(payload.into_result())
    }
}

/// Call the extractor with bounded rate-limit retries.
///
/// Each retry waits [`backoff_delay`] and resubmits a payload truncated by
/// [`shrink_factor`]. Non-transient failures return immediately; a spent
/// attempt budget returns [`ExtractError::RetriesExhausted`].
pub async fn extract_with_retry(
    extractor: &dyn Extractor,
    text: &str,
    schema: &ExtractionSchema,
) -> Result<ExtractionResult, ExtractError> {
    let total_chars = text.chars().count();
    let mut state = RetryState::Idle.begin();

    loop {
        let RetryState::Attempting(attempt) = state else {
            return Err(ExtractError::RetriesExhausted {
                attempts: MAX_ATTEMPTS,
            });
        };

        let budget = (total_chars as f64 * shrink_factor(attempt)).ceil() as usize;
        let payload = truncate_chars(text, budget);
        debug!(attempt, chars = payload.chars().count(), "Extraction attempt");

        match extractor.extract(&payload, schema).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                state = state.on_transient_failure();
                match state.retry() {
                    Some(next) => {
                        let delay = backoff_delay(attempt);
                        warn!(
                            attempt,
                            delay_secs = delay.as_secs(),
                            "Rate limited, backing off and shrinking payload"
                        );
                        tokio::time::sleep(delay).await;
                        state = next;
                    }
                    None => {
                        return Err(ExtractError::RetriesExhausted {
                            attempts: MAX_ATTEMPTS,
                        });
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}
