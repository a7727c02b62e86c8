use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

use super::{
    BackendFuture, ImageBackend, ImageRequest, decode_base64_image, http_client, post_json,
    trim_base_url,
};
use crate::settings::EndpointSettings;

/// Fooocus API (`/v1/generation/text-to-image`). Size is chosen by aspect
/// ratio; the dispatcher resizes to the exact target afterwards.
pub struct Fooocus {
    client: reqwest::Client,
    base_url: String,
    negative_prompt: String,
}

impl Fooocus {
    pub fn new(settings: &EndpointSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(settings.timeout_secs))?,
            base_url: trim_base_url(&settings.url),
            negative_prompt: settings.negative_prompt.clone(),
        })
    }

    fn payload(&self, request: &ImageRequest) -> Value {
        json!({
            "prompt": request.prompt,
            "negative_prompt": self.negative_prompt,
            "image_number": 1,
            "aspect_ratios_selection": aspect_ratio(request.width, request.height),
            "require_base64": true
        })
    }
}

impl ImageBackend for Fooocus {
    fn name(&self) -> &'static str {
        "fooocus"
    }

    fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/v1/generation/text-to-image", self.base_url);
            info!("requesting image from {}", url);
            let reply = post_json(&self.client, "Fooocus", &url, &self.payload(request)).await?;
            let encoded = extract_image(&reply)?;
            decode_base64_image("Fooocus", encoded)
        })
    }
}

/// `"9:16"` for 1080x1920.
fn aspect_ratio(width: u32, height: u32) -> String {
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Accepts `{"image": "..."}` as well as the list form
/// `[{"base64": "..."}]` newer API builds return.
fn extract_image(reply: &Value) -> Result<&str> {
    reply
        .get("image")
        .and_then(Value::as_str)
        .or_else(|| {
            reply
                .as_array()
                .and_then(|items| items.first())
                .and_then(|item| item.get("base64"))
                .and_then(Value::as_str)
        })
        .ok_or_else(|| anyhow!("no image in Fooocus response"))
}
