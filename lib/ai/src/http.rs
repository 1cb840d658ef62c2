//! HTTP backends for hosted text-generation APIs.

use crate::backend::{LlmBackend, LlmBackendConfig, LlmProvider, LlmRequest, LlmResponse, TokenUsage};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Builds the backend selected by `config`.
///
/// # Errors
///
/// Returns [`LlmError::InvalidConfig`] if a required setting is missing.
pub fn build_backend(config: &LlmBackendConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let client = reqwest::Client::new();
    match config.provider {
        LlmProvider::Gemini => {
            let api_key = config
                .api_key
                .clone()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| LlmError::InvalidConfig {
                    reason: "gemini requires an API key".to_string(),
                })?;
            Ok(Arc::new(GeminiBackend {
                client,
                base_url: trim_base(&config.base_url),
                model: config.model.clone(),
                api_key,
            }))
        }
        LlmProvider::OpenAiCompatible => Ok(Arc::new(OpenAiCompatibleBackend {
            client,
            base_url: trim_base(&config.base_url),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })),
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Sends a prepared request and returns the JSON body of a 2xx response.
async fn send_json(
    provider: LlmProvider,
    request: reqwest::RequestBuilder,
) -> Result<JsonValue, LlmError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::ProviderUnavailable {
                provider: provider.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        return Err(LlmError::RateLimited { retry_after_secs });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::RequestFailed {
            reason: format!("HTTP {}: {body}", status.as_u16()),
        });
    }

    response
        .json::<JsonValue>()
        .await
        .map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })
}

/// Google Gemini `generateContent` backend.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiBackend {
    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

fn gemini_body(request: &LlmRequest) -> JsonValue {
    let mut body = json!({
        "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
    });
    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    let mut generation = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        generation.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if !generation.is_empty() {
        body["generationConfig"] = JsonValue::Object(generation);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn parse_gemini(body: JsonValue, model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: GeminiResponse =
        serde_json::from_value(body).map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })?;

    let content = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .ok_or_else(|| LlmError::ResponseParseFailed {
            reason: "response has no candidates".to_string(),
        })?;

    let usage = parsed
        .usage_metadata
        .map(|usage| TokenUsage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        usage,
        model: model.to_string(),
    })
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let http = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_body(request));
        let body = send_json(LlmProvider::Gemini, http).await?;
        let response = parse_gemini(body, &self.model)?;
        debug!(tokens = response.usage.total(), "generation complete");
        Ok(response)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Backend for servers implementing the OpenAI `/chat/completions` API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

fn chat_body(model: &str, request: &LlmRequest) -> JsonValue {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.prompt}));

    let mut body = json!({"model": model, "messages": messages});
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_chat(body: JsonValue, model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_value(body).map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| LlmError::ResponseParseFailed {
            reason: "response has no choices".to_string(),
        })?;

    Ok(LlmResponse {
        content,
        usage: parsed
            .usage
            .map(|usage| TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default(),
        model: parsed.model.unwrap_or_else(|| model.to_string()),
    })
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&chat_body(&self.model, request));
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }
        let body = send_json(LlmProvider::OpenAiCompatible, http).await?;
        let response = parse_chat(body, &self.model)?;
        debug!(tokens = response.usage.total(), "generation complete");
        Ok(response)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAiCompatible
    }

    fn model(&self) -> &str {
        &self.model
    }
}
