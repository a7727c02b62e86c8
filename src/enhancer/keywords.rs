use unicode_normalization::UnicodeNormalization;

use super::vocabulary::Vocabulary;

pub const MAX_KEYWORDS: usize = 3;
const MIN_KEYWORD_CHARS: usize = 4;

/// Returns up to [`MAX_KEYWORDS`] candidate subject words from a caption.
///
/// Words keep their order of appearance. The first substantive word of a news
/// caption is usually its subject, which is a heuristic and not a guarantee;
/// no frequency ranking is applied.
pub fn extract(vocabulary: &Vocabulary, caption: &str) -> Vec<String> {
    let caption: String = caption.nfc().collect();
    caption
        .split_whitespace()
        .map(clean_token)
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|word| !vocabulary.is_stopword(word))
        .filter(|word| !word.chars().all(char::is_numeric))
        .take(MAX_KEYWORDS)
        .collect()
}

fn clean_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(caption: &str) -> Vec<String> {
        extract(&Vocabulary::default(), caption)
    }

    #[test]
    fn bitcoin_caption_drops_short_numeric_and_stopwords() {
        let found = keywords("Bitcoin atinge recorde histórico de US$ 100 mil");
        assert_eq!(found, ["bitcoin", "atinge", "recorde"]);
    }

    #[test]
    fn keeps_first_occurrence_order_and_caps_at_three() {
        let found = keywords("Zebra antílope búfalo camelo dromedário");
        assert_eq!(found, ["zebra", "antílope", "búfalo"]);
    }

    #[test]
    fn punctuation_is_stripped_before_length_check() {
        assert_eq!(keywords("\"Sim!\" (ok) grande..."), ["grande"]);
    }

    #[test]
    fn stopwords_of_four_or_more_chars_are_removed() {
        assert!(keywords("sobre para após antes então disse").is_empty());
    }

    #[test]
    fn purely_numeric_tokens_are_removed() {
        assert_eq!(keywords("2025 12345 inflação"), ["inflação"]);
    }

    #[test]
    fn decomposed_accents_are_composed_before_counting() {
        let decomposed = "Sa\u{0075}\u{0301}de"; // "Saúde" with a combining acute
        assert_eq!(keywords(decomposed), ["saúde"]);
    }

    #[test]
    fn empty_caption_yields_nothing() {
        assert!(keywords("").is_empty());
        assert!(keywords("   ").is_empty());
    }
}
