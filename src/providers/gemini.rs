use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::StudioError;
use crate::providers::{ParsedReply, TextGeneration};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MODEL: &str = "gemini-2.5-flash";

const GENERATE_TIMEOUT: Duration = Duration::from_secs(90);
const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Client for the Gemini content-generation endpoint.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        GEMINI_MODEL
    }

    fn key(&self) -> Result<&str, StudioError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| StudioError::Config("Gemini API key not configured.".to_string()))
    }

    /// Runs one generation request and parses the first candidate's text.
    pub async fn generate_content(&self, prompt: &str) -> Result<TextGeneration, StudioError> {
        let key = self.key()?;
        let body = json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 8192
            }
        });

        let response = self
            .http
            .post(format!("{}/{}:generateContent", self.base_url, GEMINI_MODEL))
            .query(&[("key", key)])
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "gemini transport error");
                StudioError::Transport("Failed to connect to Gemini API.".to_string())
            })?;

        let status = response.status();
        let raw = response.text().await.map_err(|err| {
            tracing::error!(error = %err, "gemini read body failed");
            StudioError::Transport("Failed to connect to Gemini API.".to_string())
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .ok()
                .and_then(|body| body.error)
                .and_then(|detail| detail.message)
                .unwrap_or_else(|| "Unknown API error.".to_string());
            tracing::error!(status = %status, body = %raw, "gemini returned error status");
            return Err(StudioError::Provider(message));
        }

        let payload: GenerateContentResponse = serde_json::from_str(&raw).map_err(|err| {
            tracing::error!(error = %err, body = %raw, "gemini response decode failed");
            StudioError::Provider("Unknown API error.".to_string())
        })?;

        let generated_text = payload
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|parts| parts.into_iter().next())
            .and_then(|part| part.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| StudioError::Provider("No content generated.".to_string()))?;

        let tokens_used = payload
            .usage_metadata
            .and_then(|usage| usage.total_token_count)
            // Rough heuristic when the provider omits usage, not billed-exact.
            .unwrap_or_else(|| estimate_tokens(prompt, &generated_text));

        let reply = parse_reply(&generated_text);
        tracing::debug!(
            structured = reply.is_structured(),
            tokens_used,
            "gemini reply parsed"
        );

        Ok(TextGeneration {
            reply,
            tokens_used,
            model: GEMINI_MODEL.to_string(),
            // Free tier.
            cost: 0.0,
        })
    }

    /// Turns an article title/summary into a short image-generator prompt.
    pub async fn describe_image(
        &self,
        title: &str,
        summary: &str,
    ) -> Result<String, StudioError> {
        let key = self.key()?;
        let mut prompt = format!("Based on this article title: '{title}'");
        if !summary.trim().is_empty() {
            prompt.push_str(&format!(" and summary: '{summary}'"));
        }
        prompt.push_str(
            "\n\nGenerate a detailed, creative image description for a featured blog post image. \
             The description should be suitable for an AI image generator. \
             Keep it under 400 characters. Be specific about style, colors, and composition.",
        );

        let body = json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "temperature": 0.8,
                "maxOutputTokens": 200
            }
        });

        let response = self
            .http
            .post(format!("{}/{}:generateContent", self.base_url, GEMINI_MODEL))
            .query(&[("key", key)])
            .timeout(DESCRIBE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "gemini transport error");
                StudioError::Transport("Failed to generate image description.".to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let raw = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %raw, "gemini returned error status");
            return Err(StudioError::Provider(
                "Failed to generate image description.".to_string(),
            ));
        }

        let payload: GenerateContentResponse = response.json().await.map_err(|err| {
            tracing::error!(error = %err, "gemini response decode failed");
            StudioError::Provider("Failed to generate image description.".to_string())
        })?;

        payload
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|parts| parts.into_iter().next())
            .and_then(|part| part.text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| StudioError::Provider("No content generated.".to_string()))
    }
}

/// Defensive parse of the model's reply. The requested envelope is JSON with
/// `content` and an optional `meta_description`, possibly fenced in a code
/// block; anything that fails to parse that way is returned verbatim.
pub fn parse_reply(text: &str) -> ParsedReply {
    let candidate = extract_fenced(text).unwrap_or_else(|| text.trim().to_string());

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) {
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            let meta_description = value
                .get("meta_description")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            return ParsedReply::Structured {
                content: content.to_string(),
                meta_description,
            };
        }
    }

    ParsedReply::Raw {
        content: text.to_string(),
    }
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

fn estimate_tokens(prompt: &str, reply: &str) -> u64 {
    ((prompt.len() + reply.len()) / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini_body(text: &str, tokens: Option<u64>) -> serde_json::Value {
        let mut body = json!({
            "candidates": [
                { "content": { "parts": [ { "text": text } ] } }
            ]
        });
        if let Some(tokens) = tokens {
            body["usageMetadata"] = json!({ "totalTokenCount": tokens });
        }
        body
    }

    #[test]
    fn fenced_json_reply_yields_structured_content() {
        let text = "```json\n{\"content\": \"<p>X</p>\", \"meta_description\": \"About X\"}\n```";
        let reply = parse_reply(text);
        assert_eq!(reply.content(), "<p>X</p>");
        assert_eq!(reply.meta_description(), Some("About X"));
        assert!(reply.is_structured());
    }

    #[test]
    fn unfenced_json_reply_is_parsed_too() {
        let reply = parse_reply("{\"content\": \"<p>bare</p>\"}");
        assert_eq!(reply.content(), "<p>bare</p>");
        assert_eq!(reply.meta_description(), None);
    }

    #[test]
    fn plain_text_reply_comes_back_verbatim() {
        let text = "Just some prose the model decided to send.";
        let reply = parse_reply(text);
        assert_eq!(reply, ParsedReply::Raw {
            content: text.to_string()
        });
    }

    #[test]
    fn json_without_content_key_falls_back_to_raw() {
        let text = "{\"body\": \"<p>X</p>\"}";
        let reply = parse_reply(text);
        assert!(!reply.is_structured());
        assert_eq!(reply.content(), text);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = GeminiClient::new(None);
        let err = client.generate_content("hi").await.unwrap_err();
        assert!(matches!(err, StudioError::Config(_)));
    }

    #[tokio::test]
    async fn success_reply_carries_reported_token_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gemini-2.5-flash:generateContent")
            .match_query(mockito::Matcher::UrlEncoded(
                "key".into(),
                "test-key".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                gemini_body(
                    "```json\n{\"content\": \"<p>Hello world</p>\"}\n```",
                    Some(42),
                )
                .to_string(),
            )
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(Some("test-key".to_string()), server.url());
        let generation = client.generate_content("write something").await.unwrap();
        mock.assert_async().await;

        assert_eq!(generation.reply.content(), "<p>Hello world</p>");
        assert_eq!(generation.tokens_used, 42);
        assert_eq!(generation.model, "gemini-2.5-flash");
        assert_eq!(generation.cost, 0.0);
    }

    #[tokio::test]
    async fn missing_usage_metadata_falls_back_to_estimate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/gemini-2.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(gemini_body("plain reply text", None).to_string())
            .create_async()
            .await;

        let prompt = "a prompt";
        let client = GeminiClient::with_base_url(Some("k".to_string()), server.url());
        let generation = client.generate_content(prompt).await.unwrap();
        let expected = ((prompt.len() + "plain reply text".len()) / 4) as u64;
        assert_eq!(generation.tokens_used, expected);
    }

    #[tokio::test]
    async fn provider_error_message_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/gemini-2.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body("{\"error\": {\"message\": \"API key not valid\"}}")
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(Some("bad".to_string()), server.url());
        let err = client.generate_content("x").await.unwrap_err();
        match err {
            StudioError::Provider(message) => assert_eq!(message, "API key not valid"),
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_without_body_gets_generic_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/gemini-2.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("")
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(Some("k".to_string()), server.url());
        let err = client.generate_content("x").await.unwrap_err();
        match err {
            StudioError::Provider(message) => assert_eq!(message, "Unknown API error."),
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
