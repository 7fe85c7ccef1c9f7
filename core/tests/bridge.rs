//! End-to-end tests: a real broker on an ephemeral loopback port, real
//! adapters connecting to it, and a scripted human on the panel side.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use holdon_core::payload::{ContentItem, CONVERSATION_END};
use holdon_core::protocol::{PanelEvent, PanelState};
use holdon_core::{
    Broker, BrokerHandle, ConcurrencyPolicy, FeedbackClient, FeedbackKind, FeedbackTool,
    Interaction, Tool,
};

async fn start_host(deadline: Duration, policy: ConcurrencyPolicy) -> BrokerHandle {
    let interaction = Arc::new(Interaction::new(deadline, policy));
    Broker::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
        .serve(interaction)
}

fn client_for(handle: &BrokerHandle, timeout: Duration) -> FeedbackClient {
    FeedbackClient::new(format!("ws://{}", handle.local_addr()), timeout)
}

/// Waits for the panel to show `prompt`; the form is always shown before
/// the human can answer.
async fn next_prompt(events: &mut tokio::sync::broadcast::Receiver<PanelEvent>) -> String {
    loop {
        if let PanelEvent::ShowPrompt { prompt, .. } = events.recv().await.unwrap() {
            return prompt;
        }
    }
}

#[tokio::test]
async fn test_submit_with_image_reaches_agent() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();
    let tool = FeedbackTool::new(client_for(&host, Duration::from_secs(30)));

    let call = tokio::spawn(async move { tool.call(&json!({"description": "did X"})).await });

    assert_eq!(next_prompt(&mut events).await, "did X");
    assert!(interaction.submit(
        "looks wrong",
        vec!["data:image/png;base64,AAAA".to_string()]
    ));

    let output = call.await.unwrap();
    assert!(!output.is_error);
    assert_eq!(output.content.len(), 2);
    match &output.content[0] {
        ContentItem::Text { text } => assert!(text.contains("looks wrong")),
        other => panic!("expected text, got {other:?}"),
    }
    assert_eq!(
        output.content[1],
        ContentItem::Image {
            data: "AAAA".into(),
            mime_type: "image/png".into()
        }
    );

    host.stop().await;
}

#[tokio::test]
async fn test_empty_submit_is_approval() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();
    let client = client_for(&host, Duration::from_secs(30));

    let call = tokio::spawn(async move { client.request_feedback("did X").await });
    next_prompt(&mut events).await;
    assert!(interaction.submit("", vec![]));

    assert_eq!(call.await.unwrap().kind(), FeedbackKind::Approved);
    host.stop().await;
}

#[tokio::test]
async fn test_end_terminates_conversation() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();
    let tool = FeedbackTool::new(client_for(&host, Duration::from_secs(30)));

    let call = tokio::spawn(async move { tool.call(&json!({"description": "did X"})).await });
    next_prompt(&mut events).await;
    assert!(interaction.end());
    // A late submit after end changes nothing.
    assert!(!interaction.submit("too late", vec![]));

    let output = call.await.unwrap();
    assert!(output.text().unwrap().contains("ended the conversation"));
    assert_eq!(interaction.state(), PanelState::Idle);
    host.stop().await;
}

#[tokio::test]
async fn test_end_sentinel_over_the_wire() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();
    let client = client_for(&host, Duration::from_secs(30));

    let call = tokio::spawn(async move { client.try_request_feedback("did X").await });
    next_prompt(&mut events).await;
    interaction.end();

    let result = call.await.unwrap().unwrap();
    assert_eq!(result.text, CONVERSATION_END);
    assert_eq!(result.kind(), FeedbackKind::Terminated);
    host.stop().await;
}

#[tokio::test]
async fn test_host_deadline_approves() {
    let host = start_host(Duration::from_millis(200), ConcurrencyPolicy::Supersede).await;
    let client = client_for(&host, Duration::from_secs(30));

    let result = client.try_request_feedback("nobody is watching").await.unwrap();
    assert_eq!(result.kind(), FeedbackKind::Approved);
    assert_eq!(host.interaction().state(), PanelState::Idle);
    host.stop().await;
}

#[tokio::test]
async fn test_adapter_deadline_approves_when_host_is_slow() {
    // Host would wait half an hour; the adapter gives up on its own.
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let client = client_for(&host, Duration::from_millis(200));

    let result = tokio::time::timeout(Duration::from_secs(10), client.request_feedback("did X"))
        .await
        .expect("adapter must return on its own deadline");
    assert_eq!(result.kind(), FeedbackKind::Approved);
    host.stop().await;
}

#[tokio::test]
async fn test_no_broker_approves() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let client = client_for(&host, Duration::from_secs(30));
    host.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(10), client.request_feedback("did X"))
        .await
        .expect("adapter must not hang without a broker");
    assert_eq!(result.kind(), FeedbackKind::Approved);
}

#[tokio::test]
async fn test_broker_stop_releases_waiting_adapter() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let mut events = host.interaction().subscribe();
    let client = client_for(&host, Duration::from_secs(30));

    let call = tokio::spawn(async move { client.request_feedback("did X").await });
    next_prompt(&mut events).await;
    host.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(10), call)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.kind(), FeedbackKind::Approved);
}

#[tokio::test]
async fn test_sequential_adapters_do_not_share_state() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();

    for round in 0..3 {
        let client = client_for(&host, Duration::from_secs(30));
        let prompt = format!("round {round}");
        let call = tokio::spawn(async move { client.request_feedback(&prompt).await });

        assert_eq!(next_prompt(&mut events).await, format!("round {round}"));
        interaction.submit(format!("answer {round}"), vec![]);
        assert_eq!(call.await.unwrap().text, format!("answer {round}"));
    }
    host.stop().await;
}

#[tokio::test]
async fn test_supersede_approves_displaced_adapter() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Supersede).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();

    let first = {
        let client = client_for(&host, Duration::from_secs(30));
        tokio::spawn(async move { client.request_feedback("first").await })
    };
    assert_eq!(next_prompt(&mut events).await, "first");

    let second = {
        let client = client_for(&host, Duration::from_secs(30));
        tokio::spawn(async move { client.request_feedback("second").await })
    };
    assert_eq!(next_prompt(&mut events).await, "second");

    assert_eq!(first.await.unwrap().kind(), FeedbackKind::Approved);
    interaction.submit("for second", vec![]);
    assert_eq!(second.await.unwrap().text, "for second");
    host.stop().await;
}

#[tokio::test]
async fn test_reject_approves_newcomer() {
    let host = start_host(Duration::from_secs(1800), ConcurrencyPolicy::Reject).await;
    let interaction = host.interaction().clone();
    let mut events = interaction.subscribe();

    let first = {
        let client = client_for(&host, Duration::from_secs(30));
        tokio::spawn(async move { client.request_feedback("first").await })
    };
    assert_eq!(next_prompt(&mut events).await, "first");

    let second = client_for(&host, Duration::from_secs(30))
        .request_feedback("second")
        .await;
    assert_eq!(second.kind(), FeedbackKind::Approved);
    assert_eq!(interaction.current_prompt().as_deref(), Some("first"));

    interaction.submit("for first", vec![]);
    assert_eq!(first.await.unwrap().text, "for first");
    host.stop().await;
}
