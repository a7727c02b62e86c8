use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

use super::{
    BackendFuture, ImageBackend, ImageRequest, decode_base64_image, http_client, post_json,
    trim_base_url,
};
use crate::settings::EndpointSettings;

const STEPS: u32 = 20;
const CFG_SCALE: f32 = 7.0;
const SAMPLER: &str = "Euler a";

/// Stable Diffusion web UI (`/sdapi/v1/txt2img`).
pub struct Automatic1111 {
    client: reqwest::Client,
    base_url: String,
    negative_prompt: String,
}

impl Automatic1111 {
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
            "steps": STEPS,
            "width": request.width,
            "height": request.height,
            "cfg_scale": CFG_SCALE,
            "sampler_name": SAMPLER,
            "seed": -1
        })
    }
}

impl ImageBackend for Automatic1111 {
    fn name(&self) -> &'static str {
        "automatic1111"
    }

    fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/sdapi/v1/txt2img", self.base_url);
            info!("requesting {}x{} image from {}", request.width, request.height, url);
            let reply = post_json(&self.client, "Automatic1111", &url, &self.payload(request)).await?;
            let encoded = extract_image(&reply)?;
            decode_base64_image("Automatic1111", encoded)
        })
    }
}

fn extract_image(reply: &Value) -> Result<&str> {
    reply
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("no image in Automatic1111 response"))
}
