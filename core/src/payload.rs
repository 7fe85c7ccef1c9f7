//! Feedback payloads and their tool-facing representation
//!
//! A human answer is free text plus zero or more pasted images. Images
//! travel over the bridge as `data:<mime>;base64,<payload>` strings and are
//! unpacked into separate image blocks on the agent side.

use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Text the panel sends when the human ends the conversation.
pub const CONVERSATION_END: &str = "CONVERSATION_END";

lazy_static! {
    static ref DATA_URI: Regex = Regex::new(r"^data:([^;]+);base64,(.+)$").unwrap();
}

/// The answer to one feedback request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResult {
    #[serde(default)]
    pub text: String,
    /// Image data URIs, in the order they were attached
    #[serde(default)]
    pub images: Vec<String>,
}

impl FeedbackResult {
    pub fn new(text: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            text: text.into(),
            images,
        }
    }

    /// Satisfied human, or nobody answered in time.
    pub fn approved() -> Self {
        Self::default()
    }

    pub fn terminated() -> Self {
        Self {
            text: CONVERSATION_END.to_string(),
            images: Vec::new(),
        }
    }

    pub fn kind(&self) -> FeedbackKind {
        classify_feedback(self)
    }
}

/// How the agent should read a [`FeedbackResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Approved,
    Adjustment,
    Terminated,
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String, // base64
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A data URI split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub data: String,
    pub mime_type: String,
}

pub fn encode_image(raw: &[u8], mime_type: &str) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(raw);
    format!("data:{};base64,{}", mime_type, payload)
}

/// Returns `None` for anything that is not exactly `data:<mime>;base64,<payload>`.
/// The payload must be non-empty, so an encoded empty image does not decode
/// and is dropped from tool content.
pub fn decode_image(data_uri: &str) -> Option<DecodedImage> {
    let caps = DATA_URI.captures(data_uri)?;
    Some(DecodedImage {
        mime_type: caps[1].to_string(),
        data: caps[2].to_string(),
    })
}

pub fn classify_feedback(feedback: &FeedbackResult) -> FeedbackKind {
    if feedback.text == CONVERSATION_END {
        FeedbackKind::Terminated
    } else if feedback.text.is_empty() && feedback.images.is_empty() {
        FeedbackKind::Approved
    } else {
        FeedbackKind::Adjustment
    }
}

/// The sentence the agent reads first in the tool result.
pub fn framing_text(feedback: &FeedbackResult) -> String {
    match classify_feedback(feedback) {
        FeedbackKind::Terminated => {
            "🏁 The user ended the conversation. Do not call request_approval again.".to_string()
        }
        FeedbackKind::Approved => "✅ The user is satisfied. The task is complete.".to_string(),
        FeedbackKind::Adjustment => {
            let mut response = if feedback.text.is_empty() {
                "🔄 The user sent feedback:".to_string()
            } else {
                format!("🔄 The user requested changes: {}", feedback.text)
            };
            if !feedback.images.is_empty() {
                response.push_str(&format!(
                    "\n\n🖼️ The user attached {} image(s):",
                    feedback.images.len()
                ));
            }
            response
        }
    }
}

/// One text block followed by one image block per decodable image.
pub fn build_tool_content(text: impl Into<String>, images: &[String]) -> Vec<ContentItem> {
    let mut content = vec![ContentItem::text(text)];
    content.extend(images.iter().filter_map(|uri| {
        decode_image(uri).map(|img| ContentItem::Image {
            data: img.data,
            mime_type: img.mime_type,
        })
    }));
    content
}

/// Full tool content for a resolved request.
pub fn feedback_content(feedback: &FeedbackResult) -> Vec<ContentItem> {
    let images: &[String] = match classify_feedback(feedback) {
        FeedbackKind::Adjustment => &feedback.images,
        _ => &[],
    };
    build_tool_content(framing_text(feedback), images)
}

/// Image MIME type guessed from a file extension.
pub fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}
