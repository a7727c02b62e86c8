mod context;
mod keywords;
mod vocabulary;

use tracing::debug;

use crate::cards::Card;

pub use context::{classify, ContextTag};
pub use keywords::{extract, MAX_KEYWORDS};
pub use vocabulary::Vocabulary;

/// Weights applied to the leading keywords, in order.
const KEYWORD_WEIGHTS: [f32; 2] = [1.5, 1.3];

/// Turns card captions into weighted diffusion prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptEnhancer {
    vocabulary: Vocabulary,
}

impl PromptEnhancer {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn classify(&self, caption: &str, headline: Option<&str>) -> ContextTag {
        classify(&self.vocabulary, caption, headline)
    }

    pub fn extract_keywords(&self, caption: &str) -> Vec<String> {
        extract(&self.vocabulary, caption)
    }

    /// Builds `(kw:1.5), (kw:1.3), <atmosphere>, <lighting>, <style>`.
    ///
    /// Missing keywords are skipped, never padded; `style` is appended verbatim.
    pub fn compose(&self, caption: &str, headline: Option<&str>, style: &str) -> String {
        let tag = self.classify(caption, headline);
        let keywords = self.extract_keywords(caption);

        let mut parts = keywords
            .iter()
            .zip(KEYWORD_WEIGHTS)
            .map(|(keyword, weight)| format!("({}:{:.1})", keyword, weight))
            .collect::<Vec<_>>();
        parts.push(tag.atmosphere().to_string());
        parts.push(tag.lighting().to_string());
        parts.push(style.to_string());

        let prompt = parts.join(", ");
        debug!(
            context = tag.as_str(),
            keywords = keywords.len(),
            "enhanced prompt: {}",
            prompt
        );
        prompt
    }

    /// Returns `cards` with every `image_prompt` recomposed.
    ///
    /// The first card is composed from `headline` when it has the
    /// `"headline\nsource"` shape, since its text is not narrative prose.
    pub fn enhance_all(&self, cards: &[Card], headline: &str, style: &str) -> Vec<Card> {
        let headline_ref = Some(headline).filter(|value| !value.trim().is_empty());
        cards
            .iter()
            .enumerate()
            .map(|(idx, card)| {
                let caption = if idx == 0 && is_title_shaped(&card.text) {
                    headline
                } else {
                    card.text.as_str()
                };
                Card {
                    image_prompt: self.compose(caption, headline_ref, style),
                    ..card.clone()
                }
            })
            .collect()
    }
}

fn is_title_shaped(text: &str) -> bool {
    text.matches('\n').count() == 1
}
