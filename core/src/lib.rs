pub mod adapter;
pub mod broker;
pub mod config;
pub mod error;
pub mod interaction;
pub mod mcp;
pub mod panel;
pub mod payload;
pub mod protocol;
pub mod tool;

// Re-exports for convenience
pub use adapter::FeedbackClient;
pub use broker::{Broker, BrokerHandle};
pub use config::{ConcurrencyPolicy, Config};
pub use error::{HoldOnError, Result};
pub use interaction::Interaction;
pub use payload::{FeedbackKind, FeedbackResult};
pub use tool::{FeedbackTool, Tool, ToolOutput};
