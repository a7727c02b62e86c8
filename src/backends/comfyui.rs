use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{BackendFuture, ImageBackend, ImageRequest, http_client, post_json, trim_base_url};
use crate::settings::ComfyUiSettings;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const VIEW_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Node id of `SaveImage` in the workflow below.
const OUTPUT_NODE: &str = "9";

/// ComfyUI: queue a txt2img workflow, poll its history, then download the
/// saved image.
pub struct ComfyUi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    negative_prompt: String,
    checkpoint: String,
    steps: u32,
    cfg: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OutputImage {
    filename: String,
    subfolder: String,
    kind: String,
}

impl ComfyUi {
    pub fn new(settings: &ComfyUiSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.endpoint.timeout_secs);
        Ok(Self {
            client: http_client(timeout.max(VIEW_TIMEOUT))?,
            base_url: trim_base_url(&settings.endpoint.url),
            timeout,
            negative_prompt: settings.endpoint.negative_prompt.clone(),
            checkpoint: settings.checkpoint.clone(),
            steps: settings.steps,
            cfg: settings.cfg,
        })
    }

    fn workflow(&self, request: &ImageRequest, seed: i64) -> Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": seed,
                    "steps": self.steps,
                    "cfg": self.cfg,
                    "sampler_name": "euler",
                    "scheduler": "normal",
                    "denoise": 1.0,
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["5", 0]
                }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": {"ckpt_name": self.checkpoint}
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": {"width": request.width, "height": request.height, "batch_size": 1}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": request.prompt, "clip": ["4", 1]}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": self.negative_prompt, "clip": ["4", 1]}
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": {"samples": ["3", 0], "vae": ["4", 2]}
            },
            OUTPUT_NODE: {
                "class_type": "SaveImage",
                "inputs": {"filename_prefix": "FlashNews", "images": ["8", 0]}
            }
        })
    }

    async fn queue(&self, request: &ImageRequest) -> Result<String> {
        let seed = OffsetDateTime::now_utc().unix_timestamp();
        let body = json!({"prompt": self.workflow(request, seed)});
        let url = format!("{}/prompt", self.base_url);
        let client = http_client(QUEUE_TIMEOUT)?;
        let reply = post_json(&client, "ComfyUI", &url, &body).await?;
        reply
            .get("prompt_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no prompt_id received from ComfyUI"))
    }

    async fn poll(&self, prompt_id: &str) -> Result<OutputImage> {
        let url = format!("{}/history/{}", self.base_url, prompt_id);
        let started = Instant::now();
        while started.elapsed() < self.timeout {
            match self.fetch_history(&url).await {
                Ok(history) => {
                    if let Some(found) = find_output_image(&history, prompt_id) {
                        return found;
                    }
                }
                Err(err) => warn!("error polling ComfyUI: {:#}", err),
            }
            sleep(POLL_INTERVAL).await;
        }
        Err(anyhow!(
            "ComfyUI generation timed out after {}s",
            self.timeout.as_secs()
        ))
    }

    async fn fetch_history(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .timeout(POLL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        response
            .json()
            .await
            .with_context(|| "ComfyUI history is not JSON")
    }

    async fn download(&self, image: &OutputImage) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/view", self.base_url),
            [
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ],
        )
        .with_context(|| "invalid ComfyUI URL")?;
        let response = self
            .client
            .get(url)
            .timeout(VIEW_TIMEOUT)
            .send()
            .await
            .with_context(|| "failed to download ComfyUI image")?
            .error_for_status()
            .with_context(|| "ComfyUI refused the image download")?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| "failed to read ComfyUI image")?;
        Ok(bytes.to_vec())
    }
}

impl ImageBackend for ComfyUi {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let prompt_id = self.queue(request).await?;
            info!("ComfyUI task started: {}", prompt_id);
            let image = self.poll(&prompt_id).await?;
            debug!("ComfyUI output: {:?}", image);
            self.download(&image).await
        })
    }
}

/// `None` while the prompt is still running. Once it shows up in the history,
/// a missing output node is an error.
fn find_output_image(history: &Value, prompt_id: &str) -> Option<Result<OutputImage>> {
    let entry = history.get(prompt_id)?;
    let image = entry
        .get("outputs")
        .and_then(|outputs| outputs.get(OUTPUT_NODE))
        .and_then(|node| node.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first());
    let Some(image) = image else {
        return Some(Err(anyhow!(
            "output node {} not found in ComfyUI history",
            OUTPUT_NODE
        )));
    };
    let field = |name: &str, default: &str| {
        image
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };
    let filename = field("filename", "");
    if filename.is_empty() {
        return Some(Err(anyhow!("ComfyUI output has no filename")));
    }
    Some(Ok(OutputImage {
        filename,
        subfolder: field("subfolder", ""),
        kind: field("type", "output"),
    }))
}
