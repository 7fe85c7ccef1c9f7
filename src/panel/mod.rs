//! Terminal review panel
//!
//! Shows each prompt the broker delivers and turns typed lines into a
//! submit or end action. Draft state lives in [`PanelModel`].

use anyhow::Result;
use console::Style;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use holdon_core::panel::PanelModel;
use holdon_core::protocol::{PanelAction, PanelEvent, PanelState};
use holdon_core::Interaction;

const HELP: &str = "Type feedback lines, then an empty line to submit (empty = approve).\n\
  /image <path>  attach a screenshot\n\
  /clear         discard the draft\n\
  /end           end the conversation\n\
  /help          show this help";

pub struct TerminalPanel {
    interaction: Arc<Interaction>,
    model: PanelModel,
}

/// What a typed line means while a prompt is waiting.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Submit,
    End,
    Clear,
    Help,
    Image(&'a str),
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Submit;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some(("/image", path)) => Input::Image(path.trim()),
        _ => match trimmed {
            "/end" => Input::End,
            "/clear" => Input::Clear,
            "/help" => Input::Help,
            _ => Input::Text(line),
        },
    }
}

impl TerminalPanel {
    pub fn new(interaction: Arc<Interaction>) -> Self {
        Self {
            interaction,
            model: PanelModel::new(),
        }
    }

    /// Runs until stdin closes.
    pub async fn run(mut self) -> Result<()> {
        let mut events = self.interaction.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        self.resync();
        if !self.model.is_waiting() {
            render_idle();
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Panel skipped {} events; resyncing", skipped);
                        self.resync();
                    }
                    Err(RecvError::Closed) => break,
                },
                line = lines.next_line() => match line? {
                    Some(line) => self.on_input(&line),
                    None => break,
                },
            }
        }
        Ok(())
    }

    fn resync(&mut self) {
        self.model = PanelModel::new();
        if let Some((id, prompt)) = self.interaction.current_request() {
            self.on_event(PanelEvent::ShowPrompt { id, prompt });
        }
    }

    fn on_event(&mut self, event: PanelEvent) {
        self.model.apply(&event);
        match event {
            PanelEvent::ShowPrompt { prompt, .. } => render_prompt(&prompt),
            PanelEvent::UpdateState {
                state: PanelState::Idle,
            } => render_idle(),
            PanelEvent::UpdateState {
                state: PanelState::Waiting,
            } => {}
        }
    }

    fn on_input(&mut self, line: &str) {
        if !self.model.is_waiting() {
            if !line.trim().is_empty() {
                println!("{}", Style::new().dim().apply_to("No request is waiting."));
            }
            return;
        }

        match parse_input(line) {
            Input::Submit => {
                if let Some(action) = self.model.take_submission() {
                    self.send(action);
                }
            }
            Input::End => {
                if let Some(action) = self.model.end_action() {
                    self.send(action);
                }
            }
            Input::Clear => {
                self.model.reset_draft();
                println!("{}", Style::new().dim().apply_to("Draft cleared."));
            }
            Input::Help => println!("{}", HELP),
            Input::Image(path) => match self.model.attach_image_file(Path::new(path)) {
                Ok(()) => println!(
                    "📎 attached {} ({} image(s))",
                    path,
                    self.model.images().len()
                ),
                Err(e) => println!("{} {}", Style::new().red().apply_to("✗"), e),
            },
            Input::Text(text) => self.model.push_line(text),
        }
    }

    fn send(&mut self, action: PanelAction) {
        if !self.interaction.handle_action(action) {
            println!(
                "{}",
                Style::new()
                    .yellow()
                    .apply_to("That request was already answered or replaced.")
            );
        }
    }
}

fn render_prompt(prompt: &str) {
    let rule = Style::new().blue().bold().apply_to("─".repeat(60));
    println!();
    println!("{}", rule);
    println!(
        "{}  {}",
        Style::new().bold().apply_to("AGENT SUMMARY"),
        Style::new()
            .dim()
            .apply_to(chrono::Local::now().format("%H:%M:%S").to_string())
    );
    println!("{}", rule);
    for line in prompt.lines() {
        println!("│ {}", line);
    }
    println!("{}", rule);
    println!(
        "{}",
        Style::new()
            .dim()
            .apply_to("Feedback (empty line = confirm and continue, /end = end conversation, /help):")
    );
}

fn render_idle() {
    println!();
    println!(
        "💬 {}",
        Style::new()
            .dim()
            .apply_to("Waiting for the agent to call request_approval...")
    );
}
