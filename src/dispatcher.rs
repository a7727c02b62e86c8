use anyhow::{Context, Result};
use image::RgbaImage;
use image::imageops::FilterType;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backends::{BackendKind, ImageBackend, ImageRequest, build_backend};
use crate::cards::Card;
use crate::overlay::{TextCompositor, encode_png};
use crate::settings::ImageSettings;

/// Sends card prompts to the configured image backend and turns the result
/// into a finished PNG card.
pub struct Dispatcher {
    settings: ImageSettings,
    kind: BackendKind,
    backend: OnceCell<Box<dyn ImageBackend>>,
    compositor: TextCompositor,
}

impl Dispatcher {
    pub fn new(settings: ImageSettings, compositor: TextCompositor) -> Result<Self> {
        let kind = BackendKind::parse(&settings.backend)?;
        Ok(Self {
            settings,
            kind,
            backend: OnceCell::new(),
            compositor,
        })
    }

    /// Uses `backend` instead of building one from settings.
    pub fn with_backend(
        settings: ImageSettings,
        compositor: TextCompositor,
        backend: Box<dyn ImageBackend>,
    ) -> Self {
        let kind = BackendKind::parse(&settings.backend).unwrap_or(BackendKind::Automatic1111);
        Self {
            settings,
            kind,
            backend: OnceCell::from(backend),
            compositor,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn compositor(&self) -> &TextCompositor {
        &self.compositor
    }

    async fn backend(&self) -> Result<&dyn ImageBackend> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                info!("initializing image backend: {}", self.kind.as_str());
                build_backend(self.kind, &self.settings)
            })
            .await?;
        Ok(backend.as_ref())
    }

    /// Generates the card image and overlays its text. Backend failures are
    /// returned as-is with the card position attached.
    pub async fn generate(&self, card: &Card, style: &str) -> Result<Vec<u8>> {
        let backend = self.backend().await?;
        let request = ImageRequest {
            prompt: build_full_prompt(&card.image_prompt, style, &self.settings.quality_suffix),
            width: self.settings.width,
            height: self.settings.height,
        };
        debug!("card {} prompt: {}", card.position, request.prompt);
        let bytes = backend.generate(&request).await.with_context(|| {
            format!(
                "{} failed to generate card {}",
                backend.name(),
                card.position
            )
        })?;
        self.finish_image(&bytes, &card.text, card.position)
    }

    /// Decodes backend output, fits it to the target size, overlays `text`
    /// (when non-empty) and encodes PNG.
    pub fn finish_image(&self, bytes: &[u8], text: &str, position: usize) -> Result<Vec<u8>> {
        let decoded =
            image::load_from_memory(bytes).with_context(|| "failed to decode generated image")?;
        let (width, height) = (self.settings.width, self.settings.height);
        let mut image: RgbaImage = if decoded.width() == width && decoded.height() == height {
            decoded.to_rgba8()
        } else {
            debug!(
                "resizing {}x{} to {}x{}",
                decoded.width(),
                decoded.height(),
                width,
                height
            );
            decoded
                .resize_to_fill(width, height, FilterType::Lanczos3)
                .to_rgba8()
        };
        if !text.trim().is_empty() {
            self.compositor.overlay(&mut image, text, position);
        }
        encode_png(&image)
    }
}

/// `"<prompt>. <style>, <quality suffix>"`. The style is skipped when the
/// prompt already ends with it, which is the case for enhanced prompts.
pub fn build_full_prompt(prompt: &str, style: &str, quality_suffix: &str) -> String {
    let prompt = clean_prompt(prompt);
    let style = clean_prompt(style);
    let mut parts = Vec::new();
    if !prompt.is_empty() {
        parts.push(prompt.clone());
    }
    if !style.is_empty() && !prompt.ends_with(&style) {
        parts.push(style);
    }
    let mut full = parts.join(". ");
    let suffix = quality_suffix.trim();
    if !suffix.is_empty() {
        if !full.is_empty() {
            full.push_str(", ");
        }
        full.push_str(suffix);
    }
    full
}

/// Keeps letters, digits, whitespace and the punctuation diffusion prompts
/// use, including the `(word:1.5)` weight syntax.
pub fn clean_prompt(text: &str) -> String {
    let kept: String = text
        .chars()
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .filter(|ch| ch.is_alphanumeric() || " ,.!?-():".contains(*ch))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendFuture;
    use crate::overlay::{FontCache, OverlayStyle};
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct FakeBackend {
        image: Vec<u8>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ImageBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a> {
            Box::pin(async move {
                self.prompts.lock().unwrap().push(request.prompt.clone());
                Ok(self.image.clone())
            })
        }
    }

    struct FailingBackend;

    impl ImageBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn generate<'a>(&'a self, _request: &'a ImageRequest) -> BackendFuture<'a> {
            Box::pin(async move { Err(anyhow::anyhow!("CUDA out of memory")) })
        }
    }

    fn small_settings() -> ImageSettings {
        ImageSettings {
            width: 90,
            height: 160,
            ..ImageSettings::default()
        }
    }

    fn compositor() -> TextCompositor {
        TextCompositor::new(OverlayStyle::default(), FontCache::new(Vec::new(), Vec::new()))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([0, 128, 255, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn enhanced_prompt_is_not_restyled() {
        let prompt = "(bitcoin:1.5), (atinge:1.3), business professional atmosphere, cyberpunk style, neon";
        assert_eq!(
            build_full_prompt(prompt, "cyberpunk style, neon", "8k, uhd"),
            format!("{}, 8k, uhd", prompt)
        );
    }

    #[test]
    fn raw_prompt_gets_style_and_suffix() {
        assert_eq!(
            build_full_prompt("golden coin on a desk", "watercolor", "8k, uhd"),
            "golden coin on a desk. watercolor, 8k, uhd"
        );
        assert_eq!(build_full_prompt("", "", "8k"), "8k");
        assert_eq!(build_full_prompt("coin", "", ""), "coin");
    }

    #[test]
    fn cleaning_drops_markup_but_keeps_weights() {
        assert_eq!(
            clean_prompt("(café:1.5),\n<b>\"neon\"</b> #city"),
            "(café:1.5), bneonb city"
        );
    }

    #[tokio::test]
    async fn generate_sends_full_prompt_and_returns_target_sized_png() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backend = FakeBackend {
            image: png(45, 80),
            prompts: Arc::clone(&prompts),
        };
        let dispatcher = Dispatcher::with_backend(small_settings(), compositor(), Box::new(backend));
        let card = Card {
            text: "Texto do cartão".to_string(),
            image_prompt: "(moeda:1.5), studio".to_string(),
            position: 2,
        };
        let bytes = dispatcher.generate(&card, "flat").await.unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (90, 160));
        assert_eq!(
            prompts.lock().unwrap().as_slice(),
            ["(moeda:1.5), studio. flat, 8k, uhd, highly detailed, sharp focus"]
        );
    }

    #[tokio::test]
    async fn backend_failure_is_propagated_with_card_position() {
        let dispatcher =
            Dispatcher::with_backend(small_settings(), compositor(), Box::new(FailingBackend));
        let card = Card::new("x", 3);
        let err = dispatcher.generate(&card, "style").await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("failing failed to generate card 3"));
        assert!(message.contains("CUDA out of memory"));
    }

    #[test]
    fn finish_image_rejects_undecodable_bytes() {
        let dispatcher = Dispatcher::new(small_settings(), compositor()).unwrap();
        assert!(dispatcher.finish_image(b"not an image", "", 1).is_err());
        let bytes = dispatcher.finish_image(&png(90, 160), "", 1).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn unknown_backend_is_rejected_up_front() {
        let settings = ImageSettings {
            backend: "pollinations".to_string(),
            ..ImageSettings::default()
        };
        assert!(Dispatcher::new(settings, compositor()).is_err());
    }
}
