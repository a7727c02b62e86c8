use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use super::vocabulary::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextTag {
    Political,
    Health,
    Economy,
    Violence,
    Science,
    Default,
}

impl ContextTag {
    /// Order in which keyword sets are tested. The first hit wins.
    ///
    /// Science-first is inherited behaviour rather than a measured choice; keep
    /// it stable so existing carousels reproduce, but it is open to revisiting.
    pub const PRIORITY: [ContextTag; 5] = [
        ContextTag::Science,
        ContextTag::Political,
        ContextTag::Health,
        ContextTag::Economy,
        ContextTag::Violence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTag::Political => "political",
            ContextTag::Health => "health",
            ContextTag::Economy => "economy",
            ContextTag::Violence => "violence",
            ContextTag::Science => "science",
            ContextTag::Default => "default",
        }
    }

    pub fn atmosphere(&self) -> &'static str {
        match self {
            ContextTag::Political => "serious political atmosphere, formal setting",
            ContextTag::Health => "medical professional atmosphere, clinical setting",
            ContextTag::Economy => "business professional atmosphere, modern office",
            ContextTag::Violence => "tense dramatic atmosphere, urgent situation",
            ContextTag::Science => {
                "scientific discovery atmosphere, natural environment, documentary feel"
            }
            ContextTag::Default => "professional news atmosphere, clean setting",
        }
    }

    pub fn lighting(&self) -> &'static str {
        match self {
            ContextTag::Political => "dramatic spotlighting",
            ContextTag::Health => "bright clinical lighting",
            ContextTag::Economy => "professional office lighting",
            ContextTag::Violence => "dramatic shadowy lighting",
            ContextTag::Science => "natural daylight, documentary style",
            ContextTag::Default => "natural professional lighting",
        }
    }
}

/// Picks the topical context of a caption (plus optional headline).
///
/// Keywords match as substrings of the lower-cased text, so `"lei"` also hits
/// `"leilão"`. Matching stops at the first set in [`ContextTag::PRIORITY`]
/// that has any hit; counts are never compared.
pub fn classify(vocabulary: &Vocabulary, caption: &str, headline: Option<&str>) -> ContextTag {
    let text = format!("{} {}", caption, headline.unwrap_or_default())
        .nfc()
        .collect::<String>()
        .to_lowercase();
    ContextTag::PRIORITY
        .into_iter()
        .find(|tag| {
            vocabulary
                .keywords(*tag)
                .iter()
                .any(|keyword| text.contains(keyword.as_str()))
        })
        .unwrap_or(ContextTag::Default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(caption: &str, headline: Option<&str>) -> ContextTag {
        classify(&Vocabulary::default(), caption, headline)
    }

    #[test]
    fn empty_text_falls_through_to_default() {
        assert_eq!(tag("", None), ContextTag::Default);
        assert_eq!(tag("Chuva forte no fim de semana", Some("")), ContextTag::Default);
    }

    #[test]
    fn science_wins_over_political() {
        assert_eq!(
            tag("Governo apoia pesquisa na floresta", None),
            ContextTag::Science
        );
    }

    #[test]
    fn first_matching_set_wins_even_with_more_hits_later() {
        // one political hit beats three economy hits
        assert_eq!(
            tag("Governo, bolsa, dólar e juros", None),
            ContextTag::Political
        );
        assert_eq!(
            tag("Governo anuncia reforma da saúde", None),
            ContextTag::Political
        );
    }

    #[test]
    fn headline_contributes_to_classification() {
        assert_eq!(
            tag("Casos sobem pela terceira semana", Some("Dengue avança em SP")),
            ContextTag::Health
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(tag("BITCOIN dispara", None), ContextTag::Economy);
        assert_eq!(tag("Surto de DENGUE", None), ContextTag::Health);
    }

    #[test]
    fn decomposed_accents_match_composed_keywords() {
        // "Saúde" written with a combining acute
        assert_eq!(tag("Sa\u{0075}\u{0301}de em alerta", None), ContextTag::Health);
        assert_eq!(tag("Alerta", Some("Ca\u{0302}mara aprova")), ContextTag::Political);
    }

    #[test]
    fn short_keywords_match_inside_longer_words() {
        // "sus" (health) is found inside "suspeito" before violence is tested
        assert_eq!(tag("Polícia prende suspeito", None), ContextTag::Health);
    }

    #[test]
    fn every_tag_has_distinct_atmosphere_and_lighting() {
        let all = [
            ContextTag::Political,
            ContextTag::Health,
            ContextTag::Economy,
            ContextTag::Violence,
            ContextTag::Science,
            ContextTag::Default,
        ];
        for (idx, left) in all.iter().enumerate() {
            for right in &all[idx + 1..] {
                assert_ne!(left.atmosphere(), right.atmosphere());
                assert_ne!(left.lighting(), right.lighting());
            }
        }
    }
}
