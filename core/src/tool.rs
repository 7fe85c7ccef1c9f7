use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::adapter::FeedbackClient;
use crate::error::HoldOnError;
use crate::payload::{classify_feedback, feedback_content, ContentItem};

/// What a tool call hands back to the agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn new(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }

    /// First text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ContentItem::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A trait for tools exposed to the agent runtime.
///
/// Tools must be `Send + Sync` so the stdio server can hold them behind `Arc`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The name of the tool (e.g., "request_approval")
    fn name(&self) -> &str;

    /// A brief description of what the tool does
    fn description(&self) -> &str;

    /// JSON schema for tool parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with its JSON arguments. Failures are reported in
    /// the output, never as a panic.
    async fn call(&self, args: &Value) -> ToolOutput;
}

/// Pauses the agent until a human approves, adjusts or ends the task.
pub struct FeedbackTool {
    client: FeedbackClient,
}

impl FeedbackTool {
    pub const NAME: &'static str = "request_approval";
    pub const ARGUMENT: &'static str = "description";

    pub fn new(client: FeedbackClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for FeedbackTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Show a summary of the work just done to the user and wait for their approval, \
         adjustment instructions (text and screenshots) or a request to end the conversation. \
         Call this before finishing every task."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Summary of what was done in this cycle"
                }
            },
            "required": ["description"]
        })
    }

    async fn call(&self, args: &Value) -> ToolOutput {
        let summary = args
            .get(Self::ARGUMENT)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if summary.is_empty() {
            let err = HoldOnError::invalid_argument(Self::ARGUMENT, "must be a non-blank string");
            tracing::warn!("{}", err);
            return ToolOutput::error(err.user_message());
        }

        tracing::info!("Requesting user review: {}", summary);
        let feedback = self.client.request_feedback(summary).await;
        tracing::info!("Review finished: {:?}", classify_feedback(&feedback));

        ToolOutput::new(feedback_content(&feedback))
    }
}
