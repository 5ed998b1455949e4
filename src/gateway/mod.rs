pub mod mock;

use crate::utils::{Result, TranslatorError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Boundary to the external text-translation capability. The pipeline, the
/// document orchestration and the live-translation facade all go through this
/// trait, so tests can substitute a deterministic implementation.
#[async_trait]
pub trait TextTranslator: Send + Sync {
    /// Translate one piece of text. `instructions` is a pre-rendered rule
    /// block (glossary + general rules) to embed in the request.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        instructions: &str,
    ) -> Result<String>;
}

/// Per-unit recovery: a failed translation becomes an empty string so one bad
/// cell cannot abort a whole batch. The empty string lands in the target cell
/// like any other result, so under overwrite a failed unit can blank a
/// previously filled translation.
pub async fn translate_or_empty(
    gateway: &dyn TextTranslator,
    text: &str,
    source_lang: &str,
    target_lang: &str,
    instructions: &str,
) -> String {
    match gateway
        .translate(text, source_lang, target_lang, instructions)
        .await
    {
        Ok(translated) => translated,
        Err(e) => {
            warn!(error = %e, text = %text, "Translation failed for unit, using empty result");
            String::new()
        }
    }
}

pub struct OllamaGateway {
    client: Client,
    host: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl OllamaGateway {
    pub fn new(host: impl Into<String>, model: impl Into<String>, timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            client,
            host: host.into(),
            model: model.into(),
        }
    }

    fn build_prompt(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        instructions: &str,
    ) -> String {
        let mut prompt = format!(
            "Translate the following text from {source} to {target}. \
             Both {source} and {target} are specified using BCP 47 language codes \
             (e.g., en, fr-FR, fr-CA, pt-BR, zh-Hant, zh-Hans). \
             Do not provide any explanation or extra text, just the translation.",
            source = source_lang,
            target = target_lang,
        );

        if !instructions.is_empty() {
            prompt.push(' ');
            prompt.push_str(instructions);
        }

        prompt.push_str(&format!(" The text to translate is: \"{}\"", text));
        prompt
    }
}

#[async_trait]
impl TextTranslator for OllamaGateway {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        instructions: &str,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: self.build_prompt(text, source_lang, target_lang, instructions),
            }],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Api(format!(
                "translation endpoint returned {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await?;
        let mut translated = chat.message.content.trim().to_string();

        // Models sometimes echo the quoting from the prompt.
        if translated.len() >= 2 && translated.starts_with('"') && translated.ends_with('"') {
            translated = translated[1..translated.len() - 1].to_string();
        }

        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_language_codes_and_instructions() {
        let gateway = OllamaGateway::new("http://localhost:11434", "test-model", 5);
        let prompt = gateway.build_prompt("Hello", "en", "zh-Hant", "Keep numerals unchanged.");
        assert!(prompt.contains("from en to zh-Hant"));
        assert!(prompt.contains("BCP 47"));
        assert!(prompt.contains("Keep numerals unchanged."));
        assert!(prompt.ends_with("The text to translate is: \"Hello\""));
    }

    #[test]
    fn prompt_without_instructions_has_no_double_space() {
        let gateway = OllamaGateway::new("http://localhost:11434", "test-model", 5);
        let prompt = gateway.build_prompt("Hello", "en", "fr", "");
        assert!(!prompt.contains("  "));
    }
}
