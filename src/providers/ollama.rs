use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use quick_xml::escape::unescape_with;
use tracing::{debug, info, warn};

use super::{Message, Provider, ProviderFuture, ProviderResponse, ProviderUsage, ToolSpec};
use crate::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};

pub(crate) const DEFAULT_URL: &str = "http://localhost:11434";
pub(crate) const DEFAULT_MODEL: &str = "llama3.2:3b";
const TEMPERATURE: f32 = 0.7;
const NUM_PREDICT: u32 = 2048;

/// Local Ollama chat endpoint. The registered tool's schema is passed as the
/// structured-output `format`, so the reply content is the tool arguments.
#[derive(Debug, Clone)]
pub struct Ollama {
    base_url: String,
    model: String,
    fallback_models: Vec<String>,
    timeout: Duration,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Ollama {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_URL.to_string()
        } else {
            base_url.trim().trim_end_matches('/').to_string()
        };
        Self {
            base_url,
            model: DEFAULT_MODEL.to_string(),
            fallback_models: Vec::new(),
            timeout: Duration::from_secs(60),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Primary model first, then fallbacks without repeats.
    fn models_to_try(&self) -> Vec<String> {
        let mut models = vec![self.model.clone()];
        for model in &self.fallback_models {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    fn request_body(&self, model: &str, tool: &ToolSpec) -> Value {
        let messages = self
            .messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role.as_str(),
                    "content": message.content
                })
            })
            .collect::<Vec<_>>();
        json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "format": tool.parameters,
            "options": {
                "temperature": TEMPERATURE,
                "num_predict": NUM_PREDICT
            }
        })
    }

    async fn chat(
        &self,
        client: &reqwest::Client,
        model: &str,
        tool: &ToolSpec,
    ) -> Result<ProviderResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.request_body(model, tool);

        let mut attempt = 0usize;
        let mut delay = RATE_LIMIT_BASE_DELAY;
        loop {
            attempt += 1;
            let response = client
                .post(&url)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("failed to reach Ollama at {}", self.base_url))?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_tool_response(&text, model);
            }
            if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                delay = wait_with_backoff("Ollama", attempt, delay, retry_after).await;
                continue;
            }
            return Err(anyhow!(
                "Ollama API error ({}): {}",
                status,
                extract_ollama_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl Provider for Ollama {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self
                .find_tool(&tool_name)
                .cloned()
                .ok_or_else(|| anyhow!("tool '{}' not registered", tool_name))?;
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .with_context(|| "failed to build HTTP client")?;

            let mut last_error = None;
            for model in self.models_to_try() {
                info!("generating {} with Ollama model {}", tool.name, model);
                match self.chat(&client, &model, &tool).await {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        warn!("Ollama model {} failed: {:#}", model, err);
                        last_error = Some(err);
                    }
                }
            }
            Err(match last_error {
                Some(err) => err.context("all Ollama models failed"),
                None => anyhow!("no Ollama models configured"),
            })
        })
    }
}

fn extract_tool_response(text: &str, model: &str) -> Result<ProviderResponse> {
    let payload: OllamaResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Ollama response JSON: {}", err))?;
    let content = payload
        .message
        .map(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("empty message returned from Ollama"))?;
    let args = parse_json_content(&content)?;
    let usage = match (payload.prompt_eval_count, payload.eval_count) {
        (None, None) => None,
        (prompt, completion) => Some(ProviderUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt.zip(completion).map(|(a, b)| a + b),
        }),
    };
    Ok(ProviderResponse {
        args,
        model: payload
            .model
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(model.to_string())),
        usage,
    })
}

/// Small models sometimes HTML-escape quotes or wrap the JSON in a markdown
/// fence even when a format is requested.
pub(crate) fn parse_json_content(content: &str) -> Result<Value> {
    let unescaped = unescape_html(content);
    if let Ok(value) = serde_json::from_str(unescaped.trim()) {
        return Ok(value);
    }
    let cleaned = unescaped.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim()).map_err(|err| {
        let sample: String = content.chars().take(200).collect();
        anyhow!("failed to parse JSON from model output: {} ({})", err, sample)
    })
}

/// XML entity decoding. Text with a stray `&` is not valid markup and is
/// returned as-is.
fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    match unescape_with(text, |entity| (entity == "nbsp").then_some("\u{a0}")) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            debug!("leaving model output escaped: {}", err);
            text.to_string()
        }
    }
}

fn extract_ollama_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }
    serde_json::from_str::<ErrorBody>(body)
        .ok()?
        .error
        .filter(|message| !message.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    model: Option<String>,
    message: Option<OllamaMessage>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}
