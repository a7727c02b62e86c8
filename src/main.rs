use std::io::{self, IsTerminal, Read};

use anyhow::{Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "flashnews-rust",
    version,
    about = "Turn a news headline into a carousel of captioned image cards"
)]
struct Cli {
    /// News headline (required unless --cards is given)
    #[arg(short = 'H', long = "headline")]
    headline: Option<String>,

    /// Outlet shown under the headline on the title card
    #[arg(short = 's', long = "source")]
    source: Option<String>,

    /// Carousel JSON to render instead of asking the text model
    #[arg(short = 'c', long = "cards")]
    cards: Option<String>,

    /// Article text file (stdin is used when omitted)
    #[arg(short = 'a', long = "article")]
    article: Option<String>,

    /// Visual style appended to every prompt (default from settings [image].style)
    #[arg(long = "style")]
    style: Option<String>,

    /// Output directory (default: ~/.flashnews-rust/output/<timestamp>)
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Print the enhanced cards as JSON and skip image generation
    #[arg(long = "prompts-only")]
    prompts_only: bool,

    /// Overlay --text onto an existing image and exit
    #[arg(long = "overlay")]
    overlay: Option<String>,

    /// Text for --overlay ("headline\nsource" on position 1)
    #[arg(long = "text")]
    text: Option<String>,

    /// Card position for --overlay; 1 is the title layout
    #[arg(long = "position", default_value_t = 2)]
    position: usize,

    /// Output file for --overlay (default: <image>_overlay.png)
    #[arg(long = "output")]
    output: Option<String>,

    /// Image backend (automatic1111, comfyui, fooocus)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,

    /// Text model: ollama, gemini, or provider:model
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    flashnews_rust::logging::init(cli.verbose)?;

    let needs_article = cli.overlay.is_none() && cli.cards.is_none() && cli.article.is_none();
    let article = if needs_article && !io::stdin().is_terminal() {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        let text = String::from_utf8(buffer)
            .map_err(|_| anyhow!("stdin must be UTF-8 article text"))?;
        Some(text)
    } else {
        None
    };

    let output = flashnews_rust::run(
        flashnews_rust::Config {
            headline: cli.headline,
            source: cli.source,
            cards_path: cli.cards,
            article_path: cli.article,
            style: cli.style,
            out_dir: cli.out,
            prompts_only: cli.prompts_only,
            overlay_image: cli.overlay,
            overlay_text: cli.text.map(|text| text.replace("\\n", "\n")),
            position: cli.position,
            output: cli.output,
            backend: cli.backend,
            model: cli.model,
            key: cli.key,
            settings_path: cli.read_settings,
        },
        article,
    )
    .await?;

    println!("{}", output);
    Ok(())
}
