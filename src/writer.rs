use anyhow::{Context, Result};
use tracing::info;

use crate::cards::ContentScript;
use crate::providers::{Provider, ProviderResponse, ProviderUsage, ToolSpec};
use crate::script::{self, ScriptRequest, TOOL_NAME, tool_spec};

/// Asks a text provider for a carousel script.
#[derive(Debug, Clone)]
pub struct ScriptWriter<P: Provider + Clone> {
    provider: P,
}

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub script: ContentScript,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl<P: Provider + Clone> ScriptWriter<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn call_tool(
        &self,
        tool: ToolSpec,
        system_prompt: String,
        user_input: String,
    ) -> Result<ProviderResponse> {
        let tool_name = tool.name.clone();
        self.provider
            .clone()
            .register_tool(tool)
            .append_system_input(system_prompt)
            .append_user_input(user_input)
            .call_tool(&tool_name)
            .await
    }

    pub async fn write(&self, request: &ScriptRequest) -> Result<ScriptOutput> {
        let system_prompt = script::render_system_prompt(TOOL_NAME)?;
        let user_prompt = script::render_user_prompt(request)?;
        let response = self
            .call_tool(tool_spec(TOOL_NAME), system_prompt, user_prompt)
            .await
            .with_context(|| format!("failed to generate script for '{}'", request.headline))?;
        let script = script::parse_tool_args(response.args, request)?;
        info!(
            "script ready: {} cards ({})",
            script.flashcards.len(),
            response.model.as_deref().unwrap_or("unknown model")
        );
        Ok(ScriptOutput {
            script,
            model: response.model,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderFuture;
    use serde_json::json;

    /// Replies with fixed arguments and records what it was asked.
    #[derive(Debug, Clone, Default)]
    struct CannedProvider {
        inputs: Vec<String>,
        tools: Vec<String>,
    }

    impl Provider for CannedProvider {
        fn append_system_input(mut self, input: String) -> Self {
            self.inputs.push(input);
            self
        }

        fn append_user_input(mut self, input: String) -> Self {
            self.inputs.push(input);
            self
        }

        fn register_tool(mut self, tool: ToolSpec) -> Self {
            self.tools.push(tool.name);
            self
        }

        fn call_tool(self, tool_name: &str) -> ProviderFuture {
            let registered = self.tools.iter().any(|name| name == tool_name);
            let saw_headline = self.inputs.iter().any(|input| input.contains("Vacina"));
            Box::pin(async move {
                assert!(registered);
                assert!(saw_headline);
                Ok(ProviderResponse {
                    args: json!({
                        "tiktokTitle": "Vacina nova",
                        "tiktokSummary": "Resumo",
                        "flashcards": [
                            {"text": "Manchete reescrita", "imagePrompt": "vial"},
                            {"text": "Aplicação começa em março", "imagePrompt": "clinic"}
                        ]
                    }),
                    model: Some("canned".to_string()),
                    usage: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn write_returns_validated_script() {
        let writer = ScriptWriter::new(CannedProvider::default());
        let request = ScriptRequest {
            headline: "Vacina contra dengue é aprovada".to_string(),
            source: "G1".to_string(),
            article: None,
            style: "watercolor".to_string(),
        };
        let output = writer.write(&request).await.unwrap();
        assert_eq!(output.model.as_deref(), Some("canned"));
        assert_eq!(
            output.script.flashcards[0].text,
            "Vacina contra dengue é aprovada\nG1"
        );
        assert_eq!(output.script.flashcards.len(), 2);
    }
}
