//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pause an autonomous agent until a human approves its work
///
/// Run `holdon host` in a terminal you keep open, and register
/// `holdon mcp` as an MCP server with your agent runtime.
#[derive(Parser, Debug)]
#[command(name = "holdon")]
#[command(author, version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the feedback broker and the terminal review panel
    Host,

    /// Serve the request_approval tool over stdio (spawned by the agent runtime)
    Mcp,

    /// Print the MCP server entry for your agent runtime's config
    McpConfig {
        /// Also copy it to the clipboard
        #[arg(long)]
        copy: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}
