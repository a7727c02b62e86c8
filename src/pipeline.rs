use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, format_description};
use tracing::info;

use crate::cards::{Card, ContentScript};
use crate::dispatcher::Dispatcher;
use crate::enhancer::PromptEnhancer;
use crate::paths;

pub const MANIFEST_FILE: &str = "carousel.json";

#[derive(Debug, Clone)]
pub struct CarouselRequest {
    pub script: ContentScript,
    /// Falls back to the title card's first line when empty.
    pub headline: String,
    pub source: String,
    pub style: String,
}

/// What `carousel.json` holds: the script metadata and the final prompts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarouselManifest {
    pub tiktok_title: String,
    pub tiktok_summary: String,
    pub headline: String,
    pub source: String,
    pub style: String,
    pub backend: String,
    pub created_at: String,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone)]
pub struct CarouselOutput {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub manifest: CarouselManifest,
}

pub struct Carousel {
    enhancer: PromptEnhancer,
    dispatcher: Dispatcher,
}

impl Carousel {
    pub fn new(enhancer: PromptEnhancer, dispatcher: Dispatcher) -> Self {
        Self {
            enhancer,
            dispatcher,
        }
    }

    pub fn enhance(&self, script: &ContentScript, headline: &str, style: &str) -> Vec<Card> {
        self.enhancer
            .enhance_all(&script.flashcards, headline, style)
    }

    /// Writes the manifest, then one PNG per card, in card order. Stops at
    /// the first card the backend fails on.
    pub async fn render(&self, request: CarouselRequest, out_dir: &Path) -> Result<CarouselOutput> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create output dir: {}", out_dir.display()))?;

        let headline = resolve_headline(&request);
        let cards = self.enhance(&request.script, &headline, &request.style);
        let manifest = CarouselManifest {
            tiktok_title: request.script.tiktok_title.clone(),
            tiktok_summary: request.script.tiktok_summary.clone(),
            headline,
            source: request.source.trim().to_string(),
            style: request.style.clone(),
            backend: self.dispatcher.kind().as_str().to_string(),
            created_at: created_at(),
            cards,
        };
        let manifest_path = out_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)
            .with_context(|| "failed to serialize carousel manifest")?;
        fs::write(&manifest_path, json)
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;

        let mut files = Vec::with_capacity(manifest.cards.len());
        for card in &manifest.cards {
            info!("rendering card {}/{}", card.position, manifest.cards.len());
            let png = self.dispatcher.generate(card, &request.style).await?;
            let path = out_dir.join(card_file_name(card.position));
            fs::write(&path, png)
                .with_context(|| format!("failed to write {}", path.display()))?;
            files.push(path);
        }

        Ok(CarouselOutput {
            dir: out_dir.to_path_buf(),
            files,
            manifest,
        })
    }
}

pub fn card_file_name(position: usize) -> String {
    format!("card_{}.png", position)
}

/// `~/.flashnews-rust/output/<UTC timestamp>`.
pub fn default_output_dir() -> Result<PathBuf> {
    let format = format_description::parse("[year][month][day]-[hour][minute][second]")
        .with_context(|| "invalid timestamp format")?;
    let stamp = OffsetDateTime::now_utc()
        .format(&format)
        .with_context(|| "failed to format timestamp")?;
    Ok(paths::output_dir().join(stamp))
}

fn resolve_headline(request: &CarouselRequest) -> String {
    let headline = request.headline.trim();
    if !headline.is_empty() {
        return headline.to_string();
    }
    request.script.headline().unwrap_or_default().to_string()
}

fn created_at() -> String {
    OffsetDateTime::now_utc()
        .format(&format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendFuture, ImageBackend, ImageRequest};
    use crate::overlay::{FontCache, OverlayStyle, TextCompositor};
    use crate::settings::ImageSettings;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    struct SolidBackend {
        fail_on: Option<String>,
    }

    impl ImageBackend for SolidBackend {
        fn name(&self) -> &'static str {
            "solid"
        }

        fn generate<'a>(&'a self, request: &'a ImageRequest) -> BackendFuture<'a> {
            Box::pin(async move {
                if let Some(marker) = &self.fail_on
                    && request.prompt.contains(marker.as_str())
                {
                    return Err(anyhow::anyhow!("backend down"));
                }
                let image = RgbaImage::from_pixel(
                    request.width,
                    request.height,
                    Rgba([20, 20, 20, 255]),
                );
                let mut bytes = Vec::new();
                image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
                Ok(bytes)
            })
        }
    }

    fn carousel(fail_on: Option<&str>) -> Carousel {
        let settings = ImageSettings {
            width: 54,
            height: 96,
            ..ImageSettings::default()
        };
        let compositor =
            TextCompositor::new(OverlayStyle::default(), FontCache::new(Vec::new(), Vec::new()));
        let backend = SolidBackend {
            fail_on: fail_on.map(str::to_string),
        };
        Carousel::new(
            PromptEnhancer::default(),
            Dispatcher::with_backend(settings, compositor, Box::new(backend)),
        )
    }

    fn request() -> CarouselRequest {
        CarouselRequest {
            script: ContentScript {
                tiktok_title: "Bitcoin voa".to_string(),
                tiktok_summary: "Resumo".to_string(),
                flashcards: vec![
                    Card::new("Bitcoin atinge recorde histórico de US$ 100 mil\nInfoMoney", 1),
                    Card::new("Investidores institucionais ampliam compras", 2),
                ],
            },
            headline: String::new(),
            source: "InfoMoney".to_string(),
            style: "cyberpunk style, neon".to_string(),
        }
    }

    #[tokio::test]
    async fn render_writes_cards_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let output = carousel(None).render(request(), dir.path()).await.unwrap();

        assert_eq!(
            output.files,
            [dir.path().join("card_1.png"), dir.path().join("card_2.png")]
        );
        for file in &output.files {
            let image = image::open(file).unwrap();
            assert_eq!((image.width(), image.height()), (54, 96));
        }

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest["headline"], "Bitcoin atinge recorde histórico de US$ 100 mil");
        assert_eq!(manifest["backend"], "automatic1111");
        let first_prompt = manifest["cards"][0]["imagePrompt"].as_str().unwrap();
        assert!(first_prompt.starts_with("(bitcoin:1.5), (atinge:1.3)"));
        assert!(first_prompt.ends_with("cyberpunk style, neon"));
        assert_eq!(manifest["cards"][1]["position"], 2);
    }

    #[tokio::test]
    async fn backend_failure_stops_the_run_but_keeps_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = carousel(Some("investidores"))
            .render(request(), dir.path())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("backend down"));
        assert!(dir.path().join(MANIFEST_FILE).exists());
        assert!(dir.path().join("card_1.png").exists());
        assert!(!dir.path().join("card_2.png").exists());
    }

    #[test]
    fn default_output_dir_is_timestamped_under_home() {
        crate::test_util::with_temp_home(|home| {
            let dir = default_output_dir().unwrap();
            assert!(dir.starts_with(home.join(".flashnews-rust/output")));
            let name = dir.file_name().unwrap().to_string_lossy().to_string();
            assert_eq!(name.len(), "20250101-120000".len());
            assert_eq!(name.as_bytes()[8], b'-');
        });
    }
}
