use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod backends;
pub mod cards;
pub mod dispatcher;
pub mod enhancer;
pub mod logging;
pub mod overlay;
mod paths;
pub mod pipeline;
mod providers;
mod retry;
pub mod script;
pub mod settings;
mod test_util;
mod writer;

pub use cards::{Card, ContentScript};
pub use dispatcher::Dispatcher;
pub use enhancer::{ContextTag, PromptEnhancer, Vocabulary};
pub use overlay::{OverlayStyle, TextCompositor};
pub use pipeline::{Carousel, CarouselOutput, CarouselRequest};
pub use providers::{Gemini, Ollama, Provider, ProviderKind, ProviderUsage};
pub use writer::{ScriptOutput, ScriptWriter};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub headline: Option<String>,
    pub source: Option<String>,
    pub cards_path: Option<String>,
    pub article_path: Option<String>,
    pub style: Option<String>,
    pub out_dir: Option<String>,
    pub prompts_only: bool,
    pub overlay_image: Option<String>,
    pub overlay_text: Option<String>,
    pub position: usize,
    pub output: Option<String>,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
}

/// Runs one command. `article` is article text piped on stdin, used when
/// `--article` is not given.
pub async fn run(config: Config, article: Option<String>) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    run_with_settings(config, settings, article).await
}

pub async fn run_with_settings(
    config: Config,
    mut settings: settings::Settings,
    article: Option<String>,
) -> Result<String> {
    if let Some(backend) = config.backend.as_deref() {
        settings.image.backend = backend.trim().to_string();
    }

    if let Some(image_path) = config.overlay_image.as_deref() {
        return overlay_file(&config, &settings, image_path);
    }

    let style = config
        .style
        .as_deref()
        .map(str::trim)
        .filter(|style| !style.is_empty())
        .unwrap_or(settings.image.style.as_str())
        .to_string();
    let source = config.source.clone().unwrap_or_default();
    let script = load_or_write_script(&config, &settings, article, &style).await?;
    let headline = config
        .headline
        .clone()
        .filter(|headline| !headline.trim().is_empty())
        .or_else(|| script.headline().map(str::to_string))
        .unwrap_or_default();

    let enhancer = PromptEnhancer::new(settings.vocabulary.clone());
    if config.prompts_only {
        let cards = enhancer.enhance_all(&script.flashcards, &headline, &style);
        return format_prompts(&script, &headline, &style, cards);
    }

    let dispatcher = Dispatcher::new(settings.image.clone(), build_compositor(&settings))?;
    let carousel = Carousel::new(enhancer, dispatcher);
    let out_dir = match config.out_dir.as_deref() {
        Some(dir) => PathBuf::from(dir),
        None => pipeline::default_output_dir()?,
    };
    let output = carousel
        .render(
            CarouselRequest {
                script,
                headline,
                source,
                style,
            },
            &out_dir,
        )
        .await?;
    Ok(format_render_output(&output))
}

pub fn build_compositor(settings: &settings::Settings) -> TextCompositor {
    TextCompositor::new(
        settings.overlay.clone(),
        overlay::FontCache::new(settings.font_paths.clone(), settings.font_families.clone()),
    )
}

async fn load_or_write_script(
    config: &Config,
    settings: &settings::Settings,
    stdin_article: Option<String>,
    style: &str,
) -> Result<ContentScript> {
    if let Some(path) = config.cards_path.as_deref() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read cards: {}", path))?;
        let script = ContentScript::from_json_str(&content)?;
        return Ok(match config.headline.as_deref() {
            Some(headline) => {
                script.with_title_card(headline, config.source.as_deref().unwrap_or_default())
            }
            None => script,
        });
    }

    let headline = config
        .headline
        .as_deref()
        .map(str::trim)
        .filter(|headline| !headline.is_empty())
        .ok_or_else(|| anyhow!("--headline is required unless --cards is given"))?;
    let article = match config.article_path.as_deref() {
        Some(path) => Some(
            fs::read_to_string(path).with_context(|| format!("failed to read article: {}", path))?,
        ),
        None => stdin_article.filter(|text| !text.trim().is_empty()),
    };

    let selection = providers::resolve_provider_selection(config.model.as_deref(), &settings.text)?;
    let provider = providers::build_provider(&selection, &settings.text, config.key.as_deref())
        .with_context(|| format!("failed to set up {}", selection.provider.as_str()))?;
    let writer = ScriptWriter::new(provider);
    let output = writer
        .write(&script::ScriptRequest {
            headline: headline.to_string(),
            source: config.source.clone().unwrap_or_default(),
            article,
            style: style.to_string(),
        })
        .await?;
    if let Some(usage) = &output.usage {
        info!(
            "script tokens: prompt={:?} completion={:?}",
            usage.prompt_tokens, usage.completion_tokens
        );
    }
    Ok(output.script)
}

fn overlay_file(config: &Config, settings: &settings::Settings, image_path: &str) -> Result<String> {
    let text = config
        .overlay_text
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| anyhow!("--text is required with --overlay"))?;
    let position = config.position.max(1);
    let mut image = image::open(image_path)
        .with_context(|| format!("failed to open image: {}", image_path))?
        .to_rgba8();
    build_compositor(settings).overlay(&mut image, text, position);

    let output = match config.output.as_deref() {
        Some(path) => PathBuf::from(path),
        None => overlay_output_path(Path::new(image_path)),
    };
    let png = overlay::encode_png(&image)?;
    fs::write(&output, png).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(output.display().to_string())
}

fn overlay_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "card".to_string());
    input.with_file_name(format!("{}_overlay.png", stem))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptsOutput<'a> {
    tiktok_title: &'a str,
    tiktok_summary: &'a str,
    headline: &'a str,
    style: &'a str,
    cards: Vec<Card>,
}

fn format_prompts(
    script: &ContentScript,
    headline: &str,
    style: &str,
    cards: Vec<Card>,
) -> Result<String> {
    let output = PromptsOutput {
        tiktok_title: &script.tiktok_title,
        tiktok_summary: &script.tiktok_summary,
        headline,
        style,
        cards,
    };
    serde_json::to_string_pretty(&output).with_context(|| "failed to serialize prompts")
}

fn format_render_output(output: &CarouselOutput) -> String {
    let mut lines = vec![format!(
        "wrote {} cards to {}",
        output.files.len(),
        output.dir.display()
    )];
    lines.extend(output.files.iter().map(|file| file.display().to_string()));
    lines.join("\n")
}
