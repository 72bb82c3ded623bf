//! Gemini chat backend: the multimodal one.
//!
//! Accepts mixed text+image requests (image URLs are downloaded and inlined
//! as base64) and voice messages (raw bytes fetched through the platform's
//! media API).

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bot::retry::send_with_retry;
use crate::bot::{BotType, ChatBackend, ChatRequest};
use crate::config::GeminiConfig;
use crate::error::BotError;
use crate::message::{Inbound, MsgKind, PartKind, Role, Turn};
use crate::platform::MediaFetcher;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Platform voice messages arrive as AMR audio.
const VOICE_MIME: &str = "audio/amr";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
enum Part {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData")]
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiBot {
    config: GeminiConfig,
    max_tokens: Option<u32>,
    http: reqwest::Client,
    /// Media downloads need platform credentials; without them voice
    /// messages are refused.
    media: Option<Arc<dyn MediaFetcher>>,
}

impl GeminiBot {
    pub fn new(
        config: GeminiConfig,
        max_tokens: Option<u32>,
        media: Option<Arc<dyn MediaFetcher>>,
    ) -> Self {
        Self {
            config,
            max_tokens,
            http: reqwest::Client::new(),
            media,
        }
    }

    /// Download an image URL and inline it as base64.
    async fn inline_image(&self, url: &str) -> Result<Part, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("image download failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("image download failed: {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("image read failed: {e}"))?;
        let mime = sniff_image_mime(&bytes);
        Ok(Part::InlineData {
            mime_type: mime.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
        })
    }

    /// Map a stored turn to wire content. Image parts holding a URL are
    /// re-downloaded; ones already carrying base64 (mime present) are inlined
    /// directly. An unfetchable history image is dropped with a warning.
    async fn to_content(&self, turn: &Turn) -> Content {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let mut parts = Vec::with_capacity(turn.parts.len());
        for part in &turn.parts {
            match part.kind {
                PartKind::Text => parts.push(Part::Text(part.data.clone())),
                PartKind::Image => match &part.mime_type {
                    Some(mime) => parts.push(Part::InlineData {
                        mime_type: mime.clone(),
                        data: part.data.clone(),
                    }),
                    None => match self.inline_image(&part.data).await {
                        Ok(p) => parts.push(p),
                        Err(e) => warn!("dropping history image: {e}"),
                    },
                },
            }
        }
        Content { role, parts }
    }

    async fn generate(&self, model: &str, contents: Vec<Content>) -> Result<String, BotError> {
        let body = GenerateRequest {
            contents,
            generation_config: self
                .max_tokens
                .map(|max_output_tokens| GenerationConfig { max_output_tokens }),
        };
        let url = format!(
            "{API_BASE}/{model}:generateContent?key={}",
            self.config.api_key
        );

        let response = send_with_retry(|| self.http.post(&url).json(&body)).await?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| BotError::Upstream(format!("response read failed: {e}")))?;
        if !status.is_success() {
            return Err(BotError::Upstream(format!("{status}: {raw}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| BotError::Upstream(format!("bad response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(BotError::Upstream(error.message));
        }

        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(BotError::Upstream("empty response".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatBackend for GeminiBot {
    fn bot_type(&self) -> BotType {
        BotType::Gemini
    }

    fn multimodal(&self) -> bool {
        true
    }

    fn media_capable(&self) -> bool {
        true
    }

    fn keeps_history(&self) -> bool {
        true
    }

    async fn chat(&self, req: ChatRequest<'_>) -> Result<String, BotError> {
        let mut contents = Vec::with_capacity(req.history.len() + 1);
        for turn in req.history {
            contents.push(self.to_content(turn).await);
        }

        // Image first, then text framing it; same part order as the stored turn.
        let mut parts = Vec::new();
        if let Some(url) = req.image_url {
            parts.push(self.inline_image(url).await.map_err(BotError::Upstream)?);
        }
        if !req.text.is_empty() {
            parts.push(Part::Text(req.text.to_string()));
        }
        contents.push(Content {
            role: "user",
            parts,
        });

        let model = req.model_override.unwrap_or(&self.config.model);
        self.generate(model, contents).await
    }

    /// Voice understanding: download the raw media and send it inline.
    async fn handle_media(&self, msg: &Inbound) -> Result<String, BotError> {
        if msg.kind != MsgKind::Voice {
            return Err(BotError::Unsupported {
                bot: self.bot_type(),
            });
        }
        let media = self.media.as_ref().ok_or_else(|| {
            BotError::Upstream("platform media download is not configured".to_string())
        })?;
        let media_id = msg
            .media_id
            .as_deref()
            .ok_or_else(|| BotError::Upstream("voice message without media id".to_string()))?;

        let audio = media
            .fetch_media(media_id)
            .await
            .map_err(BotError::Upstream)?;

        let contents = vec![Content {
            role: "user",
            parts: vec![
                Part::InlineData {
                    mime_type: VOICE_MIME.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&audio),
                },
                Part::Text("Transcribe this voice message and respond to it.".to_string()),
            ],
        }];

        self.generate(&self.config.model, contents).await
    }
}

/// Guess an image MIME type from magic bytes. Unknown data is sent as JPEG,
/// the platform's usual format.
fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0x47, 0x49, 0x46]) {
        "image/gif"
    } else if bytes.len() > 11 && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_image_mime() {
        assert_eq!(sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a]), "image/png");
        assert_eq!(sniff_image_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_image_mime(&[0xff, 0xd8, 0xff]), "image/jpeg");
        assert_eq!(sniff_image_mime(b""), "image/jpeg");
    }

    #[test]
    fn test_request_wire_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        mime_type: "image/png".to_string(),
                        data: "aGk=".to_string(),
                    },
                    Part::Text("what is this?".to_string()),
                ],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: 512,
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "what is this?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_response_parse_concatenates_text_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"a "},{"text":"cat"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed.candidates.unwrap()[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(text, "a cat");
    }

    #[test]
    fn test_api_error_parse() {
        let raw = r#"{"error":{"message":"quota exceeded"}}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.error.unwrap().message, "quota exceeded");
    }
}
