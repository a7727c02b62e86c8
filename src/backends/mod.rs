use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use crate::settings::ImageSettings;

mod automatic1111;
mod comfyui;
mod fooocus;

pub use automatic1111::Automatic1111;
pub use comfyui::ComfyUi;
pub use fooocus::Fooocus;

/// What a backend is asked to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

/// Resolves to the encoded image exactly as the backend returned it.
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Automatic1111,
    ComfyUi,
    Fooocus,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Automatic1111 => "automatic1111",
            BackendKind::ComfyUi => "comfyui",
            BackendKind::Fooocus => "fooocus",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "automatic1111" | "a1111" => Ok(BackendKind::Automatic1111),
            "comfyui" | "comfy" => Ok(BackendKind::ComfyUi),
            "fooocus" => Ok(BackendKind::Fooocus),
            other => Err(anyhow!(
                "unknown image backend '{}' (automatic1111, comfyui, fooocus)",
                other
            )),
        }
    }
}

pub fn build_backend(kind: BackendKind, settings: &ImageSettings) -> Result<Box<dyn ImageBackend>> {
    let backend: Box<dyn ImageBackend> = match kind {
        BackendKind::Automatic1111 => Box::new(Automatic1111::new(&settings.automatic1111)?),
        BackendKind::ComfyUi => Box::new(ComfyUi::new(&settings.comfyui)?),
        BackendKind::Fooocus => Box::new(Fooocus::new(&settings.fooocus)?),
    };
    Ok(backend)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .with_context(|| "failed to build HTTP client")
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// POSTs `body` and returns the JSON reply, backing off while the server is
/// busy.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &Value,
) -> Result<Value> {
    let mut attempt = 0usize;
    let mut delay = RATE_LIMIT_BASE_DELAY;
    loop {
        attempt += 1;
        let response = client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach {} at {}", service, url))?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return serde_json::from_str(&text)
                .with_context(|| format!("{} returned invalid JSON", service));
        }
        if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
            delay = wait_with_backoff(service, attempt, delay, retry_after).await;
            continue;
        }
        return Err(anyhow!("{} API error ({}): {}", service, status, snippet(&text)));
    }
}

/// Decodes a base64 image, with or without a `data:` URI prefix.
pub(crate) fn decode_base64_image(service: &str, encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    BASE64
        .decode(payload.trim())
        .with_context(|| format!("{} returned invalid base64 image data", service))
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 300 {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(300).collect();
    out.push('…');
    out
}
