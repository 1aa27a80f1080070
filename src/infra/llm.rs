//! Text-to-markdown transformation through an OpenAI-compatible responses API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::collaborators::{CollaboratorError, TextTransformer};

pub const DEFAULT_INSTRUCTIONS: &str = "Rewrite the user's text as a well structured \
Markdown document. Keep the original meaning and language. Use headings, lists and \
tables where they help readability. Reply with the Markdown document only.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid LLM base URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse LLM response: {0}")]
    Decode(String),
}

impl From<LlmError> for CollaboratorError {
    fn from(err: LlmError) -> Self {
        CollaboratorError::transform(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub project: Option<String>,
    pub model: String,
    pub instructions: String,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiTransformer {
    client: Client,
    endpoint: Url,
    api_key: String,
    project: Option<String>,
    model: String,
    instructions: String,
    temperature: f32,
}

impl OpenAiTransformer {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let mut base = config.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)?.join("responses")?;
        let client = Client::builder()
            .user_agent(concat!("docpipe/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            project: config.project,
            model: config.model,
            instructions: config.instructions,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request(&self, text: &str) -> Result<String, LlmError> {
        let body = ResponsesRequest {
            model: &self.model,
            instructions: &self.instructions,
            input: text,
            temperature: self.temperature,
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(project) = &self.project {
            request = request.header("OpenAI-Project", project);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        extract_output_text(&bytes)
    }
}

#[async_trait]
impl TextTransformer for OpenAiTransformer {
    async fn transform(&self, text: &str) -> Result<String, CollaboratorError> {
        let started_at = Instant::now();
        match self.request(text).await {
            Ok(markdown) => {
                info!(
                    target = "infra::llm",
                    op = "llm::transform",
                    result = "ok",
                    model = %self.model,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    input_bytes = text.len(),
                    output_bytes = markdown.len(),
                    "Text transformed"
                );
                Ok(markdown)
            }
            Err(err) => {
                warn!(
                    target = "infra::llm",
                    op = "llm::transform",
                    result = "error",
                    model = %self.model,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Text transformation failed"
                );
                Err(err.into())
            }
        }
    }
}

/// First text fragment of the first output message. A reply without one
/// decodes to an empty string, which callers treat as a failed transform.
fn extract_output_text(bytes: &[u8]) -> Result<String, LlmError> {
    let reply: ResponsesReply =
        serde_json::from_slice(bytes).map_err(|err| LlmError::Decode(err.to_string()))?;

    Ok(reply
        .output
        .into_iter()
        .next()
        .and_then(|item| item.content.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmClientConfig {
        LlmClientConfig {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            project: None,
            model: "gpt-4o-mini".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: 0.5,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoint_appends_responses_path() {
        let with_slash = OpenAiTransformer::new(config("https://api.example.com/v1/"))
            .expect("client");
        let without_slash =
            OpenAiTransformer::new(config("https://api.example.com/v1")).expect("client");

        assert_eq!(
            with_slash.endpoint().as_str(),
            "https://api.example.com/v1/responses"
        );
        assert_eq!(with_slash.endpoint(), without_slash.endpoint());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = OpenAiTransformer::new(config("not a url")).expect_err("must fail");
        assert!(matches!(err, LlmError::Url(_)));
    }

    #[test]
    fn extracts_first_message_text() {
        let body = br##"{
            "id": "resp_1",
            "output": [
                {"type": "message", "content": [
                    {"type": "output_text", "text": "# Heading"},
                    {"type": "output_text", "text": "ignored"}
                ]},
                {"type": "message", "content": [{"type": "output_text", "text": "later"}]}
            ]
        }"##;

        assert_eq!(extract_output_text(body).expect("decoded"), "# Heading");
    }

    #[test]
    fn missing_output_decodes_to_empty_text() {
        assert_eq!(extract_output_text(br#"{"output": []}"#).expect("decoded"), "");
        assert_eq!(extract_output_text(br#"{}"#).expect("decoded"), "");
        assert_eq!(
            extract_output_text(br#"{"output": [{"content": [{"type": "refusal"}]}]}"#)
                .expect("decoded"),
            ""
        );
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = extract_output_text(b"<html>").expect_err("must fail");
        assert!(matches!(err, LlmError::Decode(_)));
    }
}
