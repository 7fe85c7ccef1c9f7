use anyhow::{Context, Result};
use console::Style;
use std::sync::Arc;

use holdon_core::{Broker, Config, HoldOnError, Interaction};

use crate::panel::TerminalPanel;

/// Runs the broker and the terminal panel until stdin closes or Ctrl-C.
pub async fn start_host(config: &Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let interaction = Arc::new(Interaction::from_config(config));

    let broker = match Broker::bind(addr).await {
        Ok(broker) => broker,
        Err(e @ HoldOnError::Bind { .. }) => {
            // Adapters only know this port, so there is nothing to fall back to.
            tracing::error!("{}", e);
            eprintln!("{} {}", Style::new().red().apply_to("✗"), e.user_message());
            return Err(e).context("Feedback panel is unavailable");
        }
        Err(e) => return Err(e).context("Failed to start feedback broker"),
    };
    let handle = broker.serve(interaction.clone());

    println!(
        "HoldOn host listening on: {} (timeout {}s, {} policy)",
        Style::new().cyan().apply_to(format!("ws://{}", handle.local_addr())),
        config.bridge.timeout_secs,
        config.panel.concurrency
    );

    let panel = TerminalPanel::new(interaction);
    let outcome = tokio::select! {
        res = panel.run() => res,
        res = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; shutting down");
            res.context("Failed to listen for Ctrl-C")
        }
    };

    handle.stop().await;
    outcome
}
