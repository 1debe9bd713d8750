// Gemini generateContent client for attribute completion and title translation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::config::ServicesConfig;
use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{FieldCompletion, Item};
use crate::services::{AiCompletionService, CompletionContext, TranslationService};

/// Gemini REST client. One request per call; no retries here.
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

/// JSON schema for the completion response
#[derive(Debug, Serialize, Deserialize)]
struct CompletionResponse {
    completions: Vec<CompletionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionEntry {
    field: String,
    value: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TranslationResponse {
    translated_text: String,
}

impl GeminiClient {
    pub fn new(config: &ServicesConfig) -> ServiceResult<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Validation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.ai_base_url.trim_end_matches('/').to_string(),
            api_key: config.ai_api_key.clone(),
            model: config.ai_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a prompt with a structured-output schema and return the JSON text the model produced
    async fn generate(&self, prompt: String, schema: serde_json::Value) -> ServiceResult<String> {
        if self.api_key.is_empty() {
            return Err(ServiceError::Auth("AI_API_KEY is not set".to_string()));
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request_body = serde_json::json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "response_mime_type": "application/json",
                "response_schema": schema,
                "thinkingConfig": {"thinking_budget": 0}
            }
        });

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), error_text));
        }

        let response: serde_json::Value = response.json().await?;

        let (input_tokens, output_tokens) = extract_token_usage(&response);
        debug!("Gemini usage: {} in / {} out tokens", input_tokens, output_tokens);

        response["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ServiceError::InvalidResponse("Missing text in API response".to_string()))
    }
}

fn completion_prompt(item: &Item, context: &CompletionContext, missing_fields: &[String]) -> String {
    let mut prompt = format!(
        "You are completing a product catalog record.\nTitle: {}\n",
        item.title
    );
    if let Some(ref translated) = item.translated_title {
        prompt.push_str(&format!("Translated title: {}\n", translated));
    }
    if let Some(ref category) = item.category {
        prompt.push_str(&format!("Category: {}\n", category));
    }
    for (field, value) in &item.attributes {
        if !value.value.trim().is_empty() {
            prompt.push_str(&format!("Known {}: {}\n", field, value.value));
        }
    }
    if let Some(ref competitor) = context.competitor {
        prompt.push_str("Specifics of a matching listing:\n");
        for (key, value) in &competitor.specifics {
            prompt.push_str(&format!("- {}: {}\n", key, value));
        }
    }
    prompt.push_str(&format!(
        "Suggest values only for these fields: {}. \
         For each, give a confidence between 0 and 1 and a one-sentence reasoning. \
         Omit a field entirely if there is no evidence for it.",
        missing_fields.join(", ")
    ));
    prompt
}

fn completion_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "completions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "field": {"type": "string"},
                        "value": {"type": "string"},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["field", "value", "confidence"]
                }
            }
        },
        "required": ["completions"]
    })
}

/// Keep suggestions for requested fields only, with confidence clamped to [0, 1]
fn parse_completions(text: &str, missing_fields: &[String]) -> ServiceResult<Vec<FieldCompletion>> {
    let parsed: CompletionResponse = serde_json::from_str(text)
        .map_err(|e| ServiceError::InvalidResponse(format!("completion payload: {}", e)))?;

    Ok(parsed
        .completions
        .into_iter()
        .map(|c| FieldCompletion {
            field: c.field.trim().to_lowercase(),
            value: c.value.trim().to_string(),
            confidence: c.confidence.clamp(0.0, 1.0),
            reasoning: c.reasoning,
        })
        .filter(|c| !c.value.is_empty() && missing_fields.iter().any(|f| *f == c.field))
        .collect())
}

#[async_trait]
impl AiCompletionService for GeminiClient {
    #[instrument(skip(self, item, context), fields(item_id = %item.id, missing = missing_fields.len()))]
    async fn complete(
        &self,
        item: &Item,
        context: &CompletionContext,
        missing_fields: &[String],
    ) -> ServiceResult<Vec<FieldCompletion>> {
        if missing_fields.is_empty() {
            return Ok(Vec::new());
        }
        let text = self
            .generate(completion_prompt(item, context, missing_fields), completion_schema())
            .await?;
        parse_completions(&text, missing_fields)
    }
}

#[async_trait]
impl TranslationService for GeminiClient {
    #[instrument(skip(self, text))]
    async fn translate(&self, text: &str, target_language: &str) -> ServiceResult<String> {
        if text.trim().is_empty() {
            return Err(ServiceError::Validation("nothing to translate".to_string()));
        }
        let prompt = format!(
            "Translate this product title to {}. Keep brand names and model numbers unchanged.\n{}",
            target_language, text
        );
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"translated_text": {"type": "string"}},
            "required": ["translated_text"]
        });

        let raw = self.generate(prompt, schema).await?;
        let parsed: TranslationResponse = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::InvalidResponse(format!("translation payload: {}", e)))?;
        Ok(parsed.translated_text.trim().to_string())
    }
}

fn extract_token_usage(response: &serde_json::Value) -> (u64, u64) {
    let usage_metadata = &response["usageMetadata"];
    let input_tokens = usage_metadata["promptTokenCount"].as_u64().unwrap_or(0);
    let output_tokens = usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0);

    (input_tokens, output_tokens)
}
