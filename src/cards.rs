use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const EXPECTED_MIN_CARDS: usize = 6;
pub const EXPECTED_MAX_CARDS: usize = 8;

/// One slide of a carousel.
///
/// `position` is 1-based and `1` is the title card, whose text is
/// `"headline\nsource"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub text: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub position: usize,
}

impl Card {
    pub fn new(text: impl Into<String>, position: usize) -> Self {
        Self {
            text: text.into(),
            image_prompt: String::new(),
            position,
        }
    }

    pub fn is_title(&self) -> bool {
        self.position == 1
    }
}

/// Splits title card text on its first line break into `(title, source)`.
///
/// Text without a line break is all title with an empty source.
pub fn split_title(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((title, source)) => (title.trim(), source.trim()),
        None => (text.trim(), ""),
    }
}

/// A carousel script as produced by the script writer or read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentScript {
    #[serde(default)]
    pub tiktok_title: String,
    #[serde(default)]
    pub tiktok_summary: String,
    #[serde(default)]
    pub flashcards: Vec<Card>,
}

impl ContentScript {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(input).with_context(|| "failed to parse carousel JSON")?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let script: ContentScript =
            serde_json::from_value(value).with_context(|| "carousel JSON has unexpected shape")?;
        script.validate()
    }

    /// Trims card texts, rejects empty decks or cards, and renumbers positions.
    pub fn validate(mut self) -> Result<Self> {
        if self.flashcards.is_empty() {
            return Err(anyhow!("carousel has no flashcards"));
        }
        for (idx, card) in self.flashcards.iter_mut().enumerate() {
            card.text = card.text.trim().to_string();
            card.image_prompt = card.image_prompt.trim().to_string();
            if card.text.is_empty() {
                return Err(anyhow!("flashcard {} has empty text", idx + 1));
            }
            card.position = idx + 1;
        }
        let count = self.flashcards.len();
        if !(EXPECTED_MIN_CARDS..=EXPECTED_MAX_CARDS).contains(&count) {
            warn!(
                "got {} cards, expected {}-{}; accepting anyway",
                count, EXPECTED_MIN_CARDS, EXPECTED_MAX_CARDS
            );
        }
        Ok(self)
    }

    /// Forces the title card to read exactly `"headline\nsource"`.
    pub fn with_title_card(mut self, headline: &str, source: &str) -> Self {
        let headline = headline.trim();
        if headline.is_empty() {
            return self;
        }
        let text = if source.trim().is_empty() {
            headline.to_string()
        } else {
            format!("{}\n{}", headline, source.trim())
        };
        match self.flashcards.first_mut() {
            Some(first) => first.text = text,
            None => self.flashcards.push(Card::new(text, 1)),
        }
        self
    }

    /// Headline taken from the title card, if it has one.
    pub fn headline(&self) -> Option<&str> {
        let first = self.flashcards.first()?;
        let (title, _) = split_title(&first.text);
        Some(title).filter(|title| !title.is_empty())
    }
}
