//! Optional visual tagging of thumbnail frames.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::TaggingError;

const DEFAULT_PROMPT: &str = "Analyze the image and identify the main subject. Return ONLY a JSON \
array of strings: the subject type, make or brand, model, dominant color, who is riding or \
driving if anyone, and 3-5 visual keywords. Make a best guess rather than answering 'Unknown'.";

#[async_trait]
pub trait FrameTagger: Send + Sync {
    /// Tags for a JPEG frame. An empty list is a valid answer.
    async fn analyze(&self, jpeg: Bytes) -> Result<Vec<String>, TaggingError>;
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    pub enabled: bool,
    /// Base URL of a chat-completions compatible API.
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            prompt: DEFAULT_PROMPT.into(),
            max_tokens: 100,
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for TaggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggingConfig")
            .field("enabled", &self.enabled)
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Tags frames with a vision-capable chat-completions model.
pub struct VisionTagger {
    http: reqwest::Client,
    config: TaggingConfig,
}

impl fmt::Debug for VisionTagger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionTagger")
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl VisionTagger {
    /// `Ok(None)` when tagging is disabled or has no API key.
    pub fn from_config(config: TaggingConfig) -> Result<Option<Self>, TaggingError> {
        if !config.enabled || config.api_key.trim().is_empty() {
            return Ok(None);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Some(Self { http, config }))
    }

    fn request_body(&self, jpeg: &[u8]) -> serde_json::Value {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.config.prompt },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        })
    }
}

#[async_trait]
impl FrameTagger for VisionTagger {
    async fn analyze(&self, jpeg: Bytes) -> Result<Vec<String>, TaggingError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(&jpeg))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaggingError::HttpStatus { status, body });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let tags = parse_tag_response(&content)?;
        debug!(count = tags.len(), "tagged frame");
        Ok(tags)
    }
}

/// Parses a JSON string array, tolerating a surrounding Markdown code fence.
pub fn parse_tag_response(content: &str) -> Result<Vec<String>, TaggingError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let tags: Vec<String> =
        serde_json::from_str(unfenced).map_err(|e| TaggingError::Decode(e.to_string()))?;
    Ok(tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_arrays() {
        assert_eq!(
            parse_tag_response(r#"["Motorcycle", "Yamaha", "R6"]"#).expect("plain"),
            vec!["Motorcycle", "Yamaha", "R6"]
        );
        assert_eq!(
            parse_tag_response("```json\n[\"Car\", \" Red \", \"\"]\n```").expect("fenced"),
            vec!["Car", "Red"]
        );
        assert_eq!(
            parse_tag_response("```\n[\"Track\"]\n```").expect("bare fence"),
            vec!["Track"]
        );
        assert!(parse_tag_response("  ").expect("empty").is_empty());
    }

    #[test]
    fn prose_is_a_decode_error() {
        assert!(matches!(
            parse_tag_response("I see a blue motorcycle."),
            Err(TaggingError::Decode(_))
        ));
    }

    #[test]
    fn disabled_config_yields_no_tagger() {
        assert!(VisionTagger::from_config(TaggingConfig::default())
            .expect("no error")
            .is_none());
        let keyless = TaggingConfig {
            enabled: true,
            ..TaggingConfig::default()
        };
        assert!(VisionTagger::from_config(keyless).expect("no error").is_none());
    }

    #[test]
    fn request_embeds_frame_as_data_url() {
        let tagger = VisionTagger::from_config(TaggingConfig {
            enabled: true,
            api_key: "sk-test".into(),
            ..TaggingConfig::default()
        })
        .expect("build")
        .expect("enabled");
        let body = tagger.request_body(b"\xff\xd8jpeg");
        assert_eq!(body["model"], "gpt-4o-mini");
        let url = body["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .expect("url");
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }
}
