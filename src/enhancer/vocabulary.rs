use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

use super::context::ContextTag;

const STOPWORDS: &[&str] = &[
    "fato", "sobre", "para", "após", "antes", "com", "sem", "que", "uma", "um", "os", "as", "de",
    "da", "do", "em", "na", "no", "é", "são", "foi", "foram", "está", "estão", "ser", "estar",
    "ter", "tem", "teve", "tiveram", "sua", "seu", "seus", "suas", "o", "a", "e", "mas", "ou",
    "então", "diz", "disse",
];

const SCIENCE: &[&str] = &[
    "cientista",
    "cientistas",
    "espécie",
    "descoberta",
    "descobrem",
    "pesquisa",
    "pesquisadores",
    "amazônia",
    "amazónia",
    "floresta",
    "animal",
    "planta",
    "biodiversidade",
    "natureza",
];

const POLITICAL: &[&str] = &[
    "político",
    "política",
    "governo",
    "presidente",
    "congresso",
    "senado",
    "câmara",
    "eleição",
    "votação",
    "reforma",
    "lei",
];

const HEALTH: &[&str] = &[
    "saúde",
    "hospital",
    "médico",
    "enfermeiro",
    "doença",
    "dengue",
    "covid",
    "vacina",
    "tratamento",
    "paciente",
    "sus",
    "oms",
];

const ECONOMY: &[&str] = &[
    "economia",
    "dinheiro",
    "dólar",
    "real",
    "bolsa",
    "mercado",
    "bitcoin",
    "inflação",
    "juros",
    "banco",
    "investimento",
    "empresa",
];

const VIOLENCE: &[&str] = &[
    "polícia",
    "crime",
    "violência",
    "assassinato",
    "roubo",
    "prisão",
    "operação",
    "investigação",
    "suspeito",
];

/// Language-specific word lists used by the prompt heuristics.
///
/// The built-in lists target Brazilian Portuguese news copy. Every list can be
/// replaced from the `[vocabulary]` settings section without touching the
/// classification or extraction algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    stopwords: HashSet<String>,
    science: Vec<String>,
    political: Vec<String>,
    health: Vec<String>,
    economy: Vec<String>,
    violence: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            stopwords: to_set(STOPWORDS.iter().copied()),
            science: to_list(SCIENCE.iter().copied()),
            political: to_list(POLITICAL.iter().copied()),
            health: to_list(HEALTH.iter().copied()),
            economy: to_list(ECONOMY.iter().copied()),
            violence: to_list(VIOLENCE.iter().copied()),
        }
    }
}

impl Vocabulary {
    pub fn with_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stopwords = to_set(words);
        self
    }

    pub fn with_context_keywords<I, S>(mut self, tag: ContextTag, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = to_list(words);
        match tag {
            ContextTag::Science => self.science = words,
            ContextTag::Political => self.political = words,
            ContextTag::Health => self.health = words,
            ContextTag::Economy => self.economy = words,
            ContextTag::Violence => self.violence = words,
            ContextTag::Default => {}
        }
        self
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// Keywords that select `tag`. `Default` has none; it is the fall-through.
    pub fn keywords(&self, tag: ContextTag) -> &[String] {
        match tag {
            ContextTag::Science => &self.science,
            ContextTag::Political => &self.political,
            ContextTag::Health => &self.health,
            ContextTag::Economy => &self.economy,
            ContextTag::Violence => &self.violence,
            ContextTag::Default => &[],
        }
    }
}

fn to_set<I, S>(words: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    to_list(words).into_iter().collect()
}

fn to_list<I, S>(words: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|word| word.as_ref().trim().nfc().collect::<String>().to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}
