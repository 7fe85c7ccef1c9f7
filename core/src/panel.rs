//! Panel-side view model
//!
//! Tracks what the panel shows and what the human has typed so far. A new
//! prompt always starts from an empty draft.

use std::path::Path;
use uuid::Uuid;

use crate::error::{HoldOnError, Result};
use crate::payload::encode_image;
use crate::payload::mime_type_for_path;
use crate::protocol::{PanelAction, PanelEvent, PanelState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelModel {
    pub state: PanelState,
    pub prompt: Option<String>,
    /// The request the draft answers
    request: Option<Uuid>,
    draft: Vec<String>,
    images: Vec<String>,
}

impl Default for PanelModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelModel {
    pub fn new() -> Self {
        Self {
            state: PanelState::Idle,
            prompt: None,
            request: None,
            draft: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: &PanelEvent) {
        match event {
            PanelEvent::ShowPrompt { id, prompt } => {
                self.reset_draft();
                self.request = Some(*id);
                self.prompt = Some(prompt.clone());
                self.state = PanelState::Waiting;
            }
            PanelEvent::UpdateState { state } => {
                self.state = *state;
                if *state == PanelState::Idle {
                    self.prompt = None;
                    self.request = None;
                    self.reset_draft();
                }
            }
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.state == PanelState::Waiting
    }

    pub fn push_line(&mut self, line: &str) {
        self.draft.push(line.to_string());
    }

    pub fn attach_image(&mut self, data_uri: String) {
        self.images.push(data_uri);
    }

    /// Read an image file and attach it as a data URI.
    pub fn attach_image_file(&mut self, path: &Path) -> Result<()> {
        let mime = mime_type_for_path(path).ok_or_else(|| {
            HoldOnError::invalid_argument("path", format!("{} is not a known image type", path.display()))
        })?;
        let raw = std::fs::read(path)?;
        if raw.is_empty() {
            // An empty payload does not survive the data URI round trip.
            return Err(HoldOnError::invalid_argument(
                "path",
                format!("{} is empty", path.display()),
            ));
        }
        self.attach_image(encode_image(&raw, mime));
        Ok(())
    }

    pub fn draft_text(&self) -> String {
        self.draft.join("\n").trim().to_string()
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn reset_draft(&mut self) {
        self.draft.clear();
        self.images.clear();
    }

    /// The "confirm and continue" action built from the current draft.
    /// `None` when no prompt is shown.
    pub fn take_submission(&mut self) -> Option<PanelAction> {
        let id = self.request?;
        let action = PanelAction::Submit {
            id,
            text: self.draft_text(),
            images: std::mem::take(&mut self.images),
        };
        self.draft.clear();
        Some(action)
    }

    pub fn end_action(&self) -> Option<PanelAction> {
        self.request.map(|id| PanelAction::End { id })
    }
}
