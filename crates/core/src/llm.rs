use crate::error::LlmError;
use crate::traits::LanguageModel;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub text: Option<String>,
    pub segments: Vec<String>,
}

impl GenerationResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            segments: Vec::new(),
        }
    }
}

/// Primary text first, then the concatenated segments. Fails when neither
/// path yields anything.
pub fn extract_answer(response: &GenerationResponse) -> Result<String, LlmError> {
    if let Some(text) = response.text.as_ref().filter(|text| !text.is_empty()) {
        return Ok(text.clone());
    }
    if !response.segments.is_empty() {
        return Ok(response.segments.concat());
    }
    Err(LlmError::EmptyResponse)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

pub fn build_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty());
    let model: Arc<dyn LanguageModel> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiChatModel::new(
            &config.base_url,
            config.model.clone(),
            api_key,
        )?),
        LlmProvider::Gemini => Arc::new(GeminiModel::new(
            &config.base_url,
            config.model.clone(),
            api_key,
        )?),
    };
    Ok(model)
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, LlmError> {
    let response = request.json(body).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(LlmError::Api { status, message });
    }
    Ok(response.json().await?)
}

/// OpenAI-compatible `/chat/completions` (OpenAI, Ollama, vLLM, ...).
pub struct OpenAiChatModel {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(base_url: &str, model: String, api_key: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: Url::parse(&format!(
                "{}/chat/completions",
                base_url.trim_end_matches('/')
            ))?,
            model,
            api_key,
            client: Client::new(),
        })
    }
}

fn parse_openai_response(value: &Value) -> GenerationResponse {
    let content = value.pointer("/choices/0/message/content");
    let text = content.and_then(Value::as_str).map(str::to_string);
    let segments = content
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    GenerationResponse { text, segments }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, LlmError> {
        let mut request = self.client.post(self.endpoint.clone());
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        let value = post_json(request, &body).await?;
        Ok(parse_openai_response(&value))
    }
}

pub struct GeminiModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiModel {
    pub fn new(base_url: &str, model: String, api_key: Option<String>) -> Result<Self, LlmError> {
        Url::parse(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client: Client::new(),
        })
    }
}

fn parse_gemini_response(value: &Value) -> GenerationResponse {
    let parts_text = |candidate: &Value| -> Vec<String> {
        candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    let candidates = value
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let text = candidates
        .first()
        .map(|first| parts_text(first).concat())
        .filter(|text| !text.is_empty());
    let segments = candidates.iter().flat_map(parts_text).collect();

    GenerationResponse { text, segments }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, LlmError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::MissingCredentials("gemini".to_string()))?;
        let url = Url::parse(&format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        ))?;
        let request = self.client.post(url).header("x-goog-api-key", api_key);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        let value = post_json(request, &body).await?;
        Ok(parse_gemini_response(&value))
    }
}
