use anyhow::{Context, Result};
use serde_json::{Value, json};
use tera::{Context as TeraContext, Tera};

use crate::cards::ContentScript;
use crate::providers::ToolSpec;

pub const TOOL_NAME: &str = "deliver_carousel";
pub const CARD_COUNT: usize = 7;
pub const MAX_CARD_CHARS: usize = 144;
/// Articles at or below this length are treated as missing.
const MIN_ARTICLE_CHARS: usize = 100;
const MAX_EXCERPT_CHARS: usize = 3000;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");
const USER_PROMPT_TEMPLATE: &str = include_str!("prompts/user_prompt.tera");

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub headline: String,
    pub source: String,
    pub article: Option<String>,
    pub style: String,
}

pub fn tool_spec(tool_name: &str) -> ToolSpec {
    let parameters = json!({
        "type": "object",
        "properties": {
            "tiktokTitle": {"type": "string"},
            "tiktokSummary": {"type": "string"},
            "flashcards": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "imagePrompt": {"type": "string"}
                    },
                    "required": ["text", "imagePrompt"]
                }
            }
        },
        "required": ["tiktokTitle", "tiktokSummary", "flashcards"]
    });

    ToolSpec {
        name: tool_name.to_string(),
        description: "Return the carousel script: TikTok title, summary and flashcards."
            .to_string(),
        parameters,
    }
}

pub fn render_system_prompt(tool_name: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("tool_name", tool_name);
    context.insert("card_count", &CARD_COUNT);
    Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render system prompt")
}

pub fn render_user_prompt(request: &ScriptRequest) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("headline", request.headline.trim());
    context.insert("source", request.source.trim());
    context.insert("style", request.style.trim());
    context.insert("excerpt", &article_excerpt(request.article.as_deref()));
    context.insert("card_count", &CARD_COUNT);
    context.insert("max_card_chars", &MAX_CARD_CHARS);
    Tera::one_off(USER_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render user prompt")
}

/// First 3000 chars of the article, or `None` when it is too short to use.
pub fn article_excerpt(article: Option<&str>) -> Option<String> {
    let article = article?.trim();
    if article.chars().count() <= MIN_ARTICLE_CHARS {
        return None;
    }
    Some(article.chars().take(MAX_EXCERPT_CHARS).collect())
}

/// Validates the tool arguments and pins the title card to the real headline.
pub fn parse_tool_args(value: Value, request: &ScriptRequest) -> Result<ContentScript> {
    let script = ContentScript::from_value(value)?;
    Ok(script.with_title_card(&request.headline, &request.source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(article: Option<&str>) -> ScriptRequest {
        ScriptRequest {
            headline: "Bitcoin atinge recorde histórico de US$ 100 mil".to_string(),
            source: "InfoMoney".to_string(),
            article: article.map(str::to_string),
            style: "cyberpunk style, neon".to_string(),
        }
    }

    #[test]
    fn short_articles_are_ignored_and_long_ones_truncated() {
        assert_eq!(article_excerpt(None), None);
        assert_eq!(article_excerpt(Some(&"a".repeat(100))), None);
        let long = "é".repeat(5000);
        let excerpt = article_excerpt(Some(&long)).unwrap();
        assert_eq!(excerpt.chars().count(), 3000);
    }

    #[test]
    fn system_prompt_names_the_tool() {
        let prompt = render_system_prompt(TOOL_NAME).unwrap();
        assert!(prompt.contains("`deliver_carousel`"));
        assert!(prompt.contains("exatamente 7 cards"));
    }

    #[test]
    fn user_prompt_switches_on_article_presence() {
        let without = render_user_prompt(&request(None)).unwrap();
        assert!(without.contains("Texto completo do artigo indisponível"));
        assert!(without.contains("no estilo \"cyberpunk style, neon\""));
        assert!(without.contains("no máximo 144 caracteres"));

        let article = "O bitcoin superou pela primeira vez a marca de US$ 100 mil. ".repeat(5);
        let with = render_user_prompt(&request(Some(&article))).unwrap();
        assert!(with.contains("CONTEÚDO DO ARTIGO:"));
        assert!(with.contains("Use somente fatos presentes no artigo"));
        assert!(!with.contains("indisponível"));
    }

    #[test]
    fn prompts_are_not_html_escaped() {
        let mut req = request(None);
        req.source = "Folha & Cia".to_string();
        let prompt = render_user_prompt(&req).unwrap();
        assert!(prompt.contains("de Folha & Cia"));
    }

    #[test]
    fn tool_args_get_the_real_title_card() {
        let args = json!({
            "tiktokTitle": "Bitcoin voa",
            "tiktokSummary": "Resumo",
            "flashcards": [
                {"text": "Bitcoin bate 100 mil\nFonte errada", "imagePrompt": "coin"},
                {"text": "Alta de 120% no ano", "imagePrompt": "chart"}
            ]
        });
        let script = parse_tool_args(args, &request(None)).unwrap();
        assert_eq!(
            script.flashcards[0].text,
            "Bitcoin atinge recorde histórico de US$ 100 mil\nInfoMoney"
        );
        assert_eq!(script.flashcards[1].position, 2);
    }

    #[test]
    fn tool_schema_requires_flashcards() {
        let tool = tool_spec(TOOL_NAME);
        assert_eq!(tool.name, "deliver_carousel");
        let required = tool.parameters["required"].as_array().unwrap();
        assert!(required.iter().any(|value| value == "flashcards"));
    }
}
