use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::SuggestConfig;
use crate::gaps::GapTerm;

const SYSTEM_PROMPT: &str = "You are an expert SEO and UX copywriter. Your task is to optimize titles and meta descriptions to increase CTR in search results.";

/// Seam over the text-generation call so the pipeline tests run offline.
pub trait SuggestionSource {
    /// `None` means "no suggestion available", never an error.
    fn suggest(
        &mut self,
        title: &str,
        description: &str,
        gap_terms: &[GapTerm],
    ) -> Option<String>;
}

/// Requests copy suggestions from an OpenAI-compatible chat endpoint.
/// Advisory output: every failure degrades to `None`.
pub struct SuggestionClient {
    client: Option<Client>,
    config: SuggestConfig,
}

impl SuggestionClient {
    pub fn new(config: SuggestConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .ok();
        Self { client, config }
    }

    fn request(&self, title: &str, description: &str, gap_terms: &[GapTerm]) -> Result<String> {
        let api_key = match env::var(&self.config.api_key_env) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => bail!("{} is not set", self.config.api_key_env),
        };
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("suggestion HTTP client unavailable"))?;

        let body = ChatRequest {
            model: &self.config.model,
            temperature: 0.7,
            max_tokens: 500,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(title, description, gap_terms),
                },
            ],
        };

        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let response = client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .context("failed to call suggestion endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("suggestion API request failed with HTTP {status}");
        }
        let payload: ChatResponse = response
            .json()
            .context("failed to decode suggestion response")?;
        let text = payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            bail!("suggestion response contained no text");
        }
        Ok(text.trim().to_string())
    }
}

impl SuggestionSource for SuggestionClient {
    fn suggest(
        &mut self,
        title: &str,
        description: &str,
        gap_terms: &[GapTerm],
    ) -> Option<String> {
        match self.request(title, description, gap_terms) {
            Ok(text) => Some(text),
            Err(error) => {
                tracing::warn!(
                    error = format!("{error:#}"),
                    "suggestion request failed, continuing without suggestions"
                );
                None
            }
        }
    }
}

fn build_prompt(title: &str, description: &str, gap_terms: &[GapTerm]) -> String {
    let terms = gap_terms
        .iter()
        .map(|term| term.token.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Here is the existing title: {title}\n\
         Here is the existing meta description: {description}\n\
         Here are the gap terms missing from both: {terms}\n\
         \n\
         Generate 3 optimized suggestions for both titles and meta descriptions."
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}
