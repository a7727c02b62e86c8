use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::enhancer::{ContextTag, Vocabulary};
use crate::overlay::OverlayStyle;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub vocabulary: Vocabulary,
    pub overlay: OverlayStyle,
    pub font_paths: Vec<String>,
    pub font_families: Vec<String>,
    pub image: ImageSettings,
    pub text: TextSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            overlay: OverlayStyle::default(),
            font_paths: Vec::new(),
            font_families: vec!["sans-serif".to_string()],
            image: ImageSettings::default(),
            text: TextSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSettings {
    pub backend: String,
    pub width: u32,
    pub height: u32,
    /// Style used when the command line gives none.
    pub style: String,
    pub quality_suffix: String,
    pub automatic1111: EndpointSettings,
    pub comfyui: ComfyUiSettings,
    pub fooocus: EndpointSettings,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            backend: "automatic1111".to_string(),
            width: 1080,
            height: 1920,
            style: "photorealistic".to_string(),
            quality_suffix: "8k, uhd, highly detailed, sharp focus".to_string(),
            automatic1111: EndpointSettings::new(
                "http://localhost:7860",
                45,
                "low quality, blurry, distorted, ugly, bad anatomy",
            ),
            comfyui: ComfyUiSettings::default(),
            fooocus: EndpointSettings::new("http://localhost:7865", 45, "low quality, blurry"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSettings {
    pub url: String,
    pub timeout_secs: u64,
    pub negative_prompt: String,
}

impl EndpointSettings {
    fn new(url: &str, timeout_secs: u64, negative_prompt: &str) -> Self {
        Self {
            url: url.to_string(),
            timeout_secs,
            negative_prompt: negative_prompt.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComfyUiSettings {
    pub endpoint: EndpointSettings,
    pub checkpoint: String,
    pub steps: u32,
    pub cfg: f32,
}

impl Default for ComfyUiSettings {
    fn default() -> Self {
        Self {
            endpoint: EndpointSettings::new(
                "http://localhost:8188",
                180,
                "low quality, blurry, watermark, text, signature",
            ),
            checkpoint: "SDXL-TURBO\\sd_xl_turbo_1.0_fp16.safetensors".to_string(),
            steps: 20,
            cfg: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSettings {
    pub backend: String,
    pub ollama_url: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    pub gemini_model: String,
    pub timeout_secs: u64,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            fallback_models: Vec::new(),
            gemini_model: "gemini-2.5-flash".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    vocabulary: Option<VocabularyFile>,
    overlay: Option<OverlayFile>,
    image: Option<ImageFile>,
    text: Option<TextFile>,
}

#[derive(Debug, Default, Deserialize)]
struct VocabularyFile {
    stopwords: Option<Vec<String>>,
    contexts: Option<ContextsFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextsFile {
    science: Option<Vec<String>>,
    political: Option<Vec<String>>,
    health: Option<Vec<String>>,
    economy: Option<Vec<String>>,
    violence: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlayFile {
    font_paths: Option<Vec<String>>,
    font_families: Option<Vec<String>>,
    font_size: Option<f32>,
    stroke_width: Option<u32>,
    text_color: Option<String>,
    stroke_color: Option<String>,
    source_color: Option<String>,
    title_margin: Option<f32>,
    content_margin: Option<f32>,
    title_line_spacing: Option<f32>,
    content_line_spacing: Option<f32>,
    source_gap: Option<f32>,
    source_scale: Option<f32>,
    content_top_ratio: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageFile {
    backend: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    style: Option<String>,
    quality_suffix: Option<String>,
    automatic1111: Option<EndpointFile>,
    comfyui: Option<ComfyUiFile>,
    fooocus: Option<EndpointFile>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
    negative_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ComfyUiFile {
    #[serde(flatten)]
    endpoint: EndpointFile,
    checkpoint: Option<String>,
    steps: Option<u32>,
    cfg: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct TextFile {
    backend: Option<String>,
    ollama_url: Option<String>,
    model: Option<String>,
    fallback_models: Option<Vec<String>>,
    gemini_model: Option<String>,
    timeout_secs: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
        set_string(&mut settings.text.ollama_url, Some(url));
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(vocabulary) = incoming.vocabulary {
            self.merge_vocabulary(vocabulary);
        }
        if let Some(overlay) = incoming.overlay {
            self.merge_overlay(overlay);
        }
        if let Some(image) = incoming.image {
            self.image.merge(image);
        }
        if let Some(text) = incoming.text {
            self.text.merge(text);
        }
    }

    fn merge_vocabulary(&mut self, incoming: VocabularyFile) {
        let mut vocabulary = std::mem::take(&mut self.vocabulary);
        if let Some(stopwords) = incoming.stopwords {
            vocabulary = vocabulary.with_stopwords(stopwords);
        }
        if let Some(contexts) = incoming.contexts {
            let lists = [
                (ContextTag::Science, contexts.science),
                (ContextTag::Political, contexts.political),
                (ContextTag::Health, contexts.health),
                (ContextTag::Economy, contexts.economy),
                (ContextTag::Violence, contexts.violence),
            ];
            for (tag, words) in lists {
                if let Some(words) = words {
                    vocabulary = vocabulary.with_context_keywords(tag, words);
                }
            }
        }
        self.vocabulary = vocabulary;
    }

    fn merge_overlay(&mut self, incoming: OverlayFile) {
        if let Some(font_paths) = incoming.font_paths {
            self.font_paths = non_empty(font_paths);
        }
        if let Some(families) = incoming.font_families {
            self.font_families = non_empty(families);
        }
        let style = &mut self.overlay;
        set_positive(&mut style.font_size, incoming.font_size);
        if let Some(width) = incoming.stroke_width {
            style.stroke_width = width;
        }
        set_string(&mut style.text_color, incoming.text_color);
        set_string(&mut style.stroke_color, incoming.stroke_color);
        set_string(&mut style.source_color, incoming.source_color);
        set_non_negative(&mut style.title_margin, incoming.title_margin);
        set_non_negative(&mut style.content_margin, incoming.content_margin);
        set_non_negative(&mut style.title_line_spacing, incoming.title_line_spacing);
        set_non_negative(&mut style.content_line_spacing, incoming.content_line_spacing);
        set_non_negative(&mut style.source_gap, incoming.source_gap);
        set_positive(&mut style.source_scale, incoming.source_scale);
        if let Some(ratio) = incoming.content_top_ratio
            && (0.0..1.0).contains(&ratio)
        {
            style.content_top_ratio = ratio;
        }
    }
}

impl ImageSettings {
    fn merge(&mut self, incoming: ImageFile) {
        set_string(&mut self.backend, incoming.backend);
        if let Some(width) = incoming.width
            && width > 0
        {
            self.width = width;
        }
        if let Some(height) = incoming.height
            && height > 0
        {
            self.height = height;
        }
        set_string(&mut self.style, incoming.style);
        if let Some(suffix) = incoming.quality_suffix {
            self.quality_suffix = suffix.trim().to_string();
        }
        if let Some(endpoint) = incoming.automatic1111 {
            self.automatic1111.merge(endpoint);
        }
        if let Some(comfyui) = incoming.comfyui {
            self.comfyui.endpoint.merge(comfyui.endpoint);
            set_string(&mut self.comfyui.checkpoint, comfyui.checkpoint);
            if let Some(steps) = comfyui.steps
                && steps > 0
            {
                self.comfyui.steps = steps;
            }
            set_positive(&mut self.comfyui.cfg, comfyui.cfg);
        }
        if let Some(endpoint) = incoming.fooocus {
            self.fooocus.merge(endpoint);
        }
    }
}

impl EndpointSettings {
    fn merge(&mut self, incoming: EndpointFile) {
        set_string(&mut self.url, incoming.url);
        if let Some(timeout) = incoming.timeout_secs
            && timeout > 0
        {
            self.timeout_secs = timeout;
        }
        if let Some(negative) = incoming.negative_prompt {
            self.negative_prompt = negative.trim().to_string();
        }
    }
}

impl TextSettings {
    fn merge(&mut self, incoming: TextFile) {
        set_string(&mut self.backend, incoming.backend);
        set_string(&mut self.ollama_url, incoming.ollama_url);
        set_string(&mut self.model, incoming.model);
        if let Some(models) = incoming.fallback_models {
            self.fallback_models = non_empty(models);
        }
        set_string(&mut self.gemini_model, incoming.gemini_model);
        if let Some(timeout) = incoming.timeout_secs
            && timeout > 0
        {
            self.timeout_secs = timeout;
        }
    }
}

fn set_string(target: &mut String, value: Option<String>) {
    if let Some(value) = value
        && !value.trim().is_empty()
    {
        *target = value.trim().to_string();
    }
}

fn set_positive(target: &mut f32, value: Option<f32>) {
    if let Some(value) = value
        && value > 0.0
    {
        *target = value;
    }
}

fn set_non_negative(target: &mut f32, value: Option<f32>) {
    if let Some(value) = value
        && value >= 0.0
    {
        *target = value;
    }
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}
