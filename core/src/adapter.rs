//! Bridge client used by the tool-invocation process
//!
//! Opens a fresh connection per request and races the broker's answer
//! against connection failure and its own deadline. Anything other than a
//! real answer becomes an approval so the agent is never stuck.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::Config;
use crate::error::{HoldOnError, Result};
use crate::payload::FeedbackResult;
use crate::protocol::BridgeMessage;

type BridgeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct FeedbackClient {
    url: String,
    timeout: Duration,
}

impl FeedbackClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.bridge_url(), config.feedback_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the host for feedback on `prompt`. Always returns; failures and
    /// the deadline both resolve as approved.
    pub async fn request_feedback(&self, prompt: &str) -> FeedbackResult {
        match self.try_request_feedback(prompt).await {
            Ok(result) => result,
            Err(e) if e.is_fail_open() => {
                tracing::warn!("{}; treating as approved", e);
                FeedbackResult::approved()
            }
            Err(e) => {
                tracing::error!("Feedback exchange failed: {}; treating as approved", e);
                FeedbackResult::approved()
            }
        }
    }

    /// Same exchange, but reports why no answer arrived.
    pub async fn try_request_feedback(&self, prompt: &str) -> Result<FeedbackResult> {
        // `None` when the timeout is too large to represent; wait without one.
        let deadline = Instant::now().checked_add(self.timeout);
        let elapsed = || HoldOnError::Timeout {
            duration: self.timeout,
        };

        let (mut ws, _) = before(deadline, connect_async(self.url.as_str()))
            .await
            .ok_or_else(elapsed)?
            .map_err(|e| HoldOnError::connection(format!("{}: {}", self.url, e)))?;
        tracing::debug!("Connected to feedback broker at {}", self.url);

        let outcome = before(deadline, exchange(&mut ws, prompt))
            .await
            .unwrap_or_else(|| Err(elapsed()));

        // Closed on every path; a broker that never acknowledges is not waited on.
        let _ = timeout(CLOSE_GRACE, ws.close(None)).await;
        outcome
    }
}

impl Default for FeedbackClient {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Runs `fut` to completion or until `deadline`, whichever is first.
async fn before<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn exchange(ws: &mut BridgeStream, prompt: &str) -> Result<FeedbackResult> {
    let request = BridgeMessage::RequestFeedback {
        prompt: prompt.to_string(),
    };
    ws.send(Message::Text(request.to_json()?.into())).await?;

    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => match BridgeMessage::parse(text.as_str()) {
                Ok(BridgeMessage::FeedbackResult(result)) => return Ok(result),
                Ok(other) => tracing::warn!("Ignoring unexpected {:?} from broker", other),
                Err(e) => tracing::warn!("Ignoring frame from broker: {}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(HoldOnError::connection("broker closed the connection"))
}
