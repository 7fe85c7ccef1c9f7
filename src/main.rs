//! `holdon` - human approval bridge for autonomous agents
//!
//! `holdon host` keeps a review panel open in a terminal. Agent runtimes
//! spawn `holdon mcp`, whose `request_approval` tool hands each summary to
//! the panel and returns the human's answer.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use console::Style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{Cli, Commands};
use holdon_core::mcp::McpServer;
use holdon_core::{Config, FeedbackClient, FeedbackTool};

mod cli;
mod panel;
mod server;

const DEFAULT_LOG_FILTER: &str = "holdon=info,holdon_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!(
            "{} v{} ({})",
            Style::new().blue().apply_to("holdon"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    let _guard = init_logging(matches!(cli.command, Some(Commands::Host)))?;

    let config = Config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::Host) => server::start_host(&config).await,
        Some(Commands::Mcp) => run_mcp(&config).await,
        Some(Commands::McpConfig { copy }) => print_mcp_config(cli.config.as_deref(), copy),
        Some(Commands::Config { init }) => handle_config(cli.config.as_deref(), &config, init),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

/// The host logs to a file so log lines do not tear the panel; everything
/// else logs to stderr, since stdout carries MCP traffic.
fn init_logging(to_file: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = log_filter(std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).ok());

    if to_file {
        if let Some(log_dir) = holdon_core::config::get_data_dir() {
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create {}", log_dir.display()))?;
            let appender = tracing_appender::rolling::never(&log_dir, "host.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
            return Ok(Some(guard));
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(None)
}

/// `RUST_LOG` when set and valid, otherwise info for both crates.
fn log_filter(rust_log: Option<String>) -> tracing_subscriber::EnvFilter {
    rust_log
        .and_then(|spec| tracing_subscriber::EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

async fn run_mcp(config: &Config) -> Result<()> {
    let tool = FeedbackTool::new(FeedbackClient::from_config(config));
    let server = McpServer::new("holdon", env!("CARGO_PKG_VERSION")).with_tool(Arc::new(tool));

    tracing::info!("MCP server ready (bridge {})", config.bridge_url());
    Arc::new(server)
        .serve_stdio()
        .await
        .context("MCP stdio server failed")
}

fn mcp_config_snippet(exe: &Path, config_path: Option<&Path>) -> serde_json::Value {
    let mut args = vec!["mcp".to_string()];
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    serde_json::json!({
        "holdon": {
            "command": exe.display().to_string(),
            "args": args
        }
    })
}

fn print_mcp_config(config_path: Option<&Path>, copy: bool) -> Result<()> {
    let exe = std::env::current_exe().context("Could not locate the holdon executable")?;
    let snippet = serde_json::to_string_pretty(&mcp_config_snippet(&exe, config_path))?;
    println!("{}", snippet);

    if copy {
        let mut clipboard = arboard::Clipboard::new().context("Clipboard is unavailable")?;
        clipboard
            .set_text(snippet)
            .context("Failed to copy to clipboard")?;
        eprintln!("{}", Style::new().green().apply_to("✓ MCP config copied to clipboard"));
    }
    Ok(())
}

fn handle_config(config_path: Option<&Path>, config: &Config, init: bool) -> Result<()> {
    let path: Option<PathBuf> = config_path
        .map(Path::to_path_buf)
        .or_else(Config::default_path);

    if init {
        let path = path.context("Could not determine a config directory")?;
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    if let Some(path) = &path {
        let note = if path.exists() { "" } else { " (not found, using defaults)" };
        println!("# {}{}", path.display(), note);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
