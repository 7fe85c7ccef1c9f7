use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HoldOnError, Result};
use crate::payload::FeedbackResult;

/// Frames exchanged between the tool adapter and the broker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    /// adapter -> broker
    RequestFeedback { prompt: String },
    /// broker -> adapter
    FeedbackResult(FeedbackResult),
}

impl BridgeMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| HoldOnError::malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PanelState {
    Idle,
    Waiting,
}

/// Host -> panel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PanelEvent {
    ShowPrompt { id: Uuid, prompt: String },
    UpdateState { state: PanelState },
}

/// Panel -> host. Each action names the request it answers; an action for
/// a request that is no longer waiting is dropped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PanelAction {
    Submit {
        id: Uuid,
        #[serde(default)]
        text: String,
        #[serde(default)]
        images: Vec<String>,
    },
    End {
        id: Uuid,
    },
}

impl PanelAction {
    pub fn request_id(&self) -> Uuid {
        match self {
            PanelAction::Submit { id, .. } | PanelAction::End { id } => *id,
        }
    }
}
