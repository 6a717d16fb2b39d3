//! End-to-end chat turns: scripted model output through context
//! assembly, the stream engine, and the conversation store.

use std::sync::Arc;

use kindred_container::Container;
use kindred_core::message::ConversationId;
use kindred_gateway::AppState;
use kindred_gateway::turn::run_turn;
use kindred_protocol::{EventSink, ServerEvent};
use kindred_provider::ScriptedModel;

async fn drain(mut rx: tokio::sync::mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn split_reply_lands_as_two_bubbles() {
    let model = ScriptedModel::single("Short thought.<<<SPLIT>>>And a second one.");
    let container = Container::builder().with_model(Arc::new(model)).build();
    let state = AppState::new(container);
    let (sink, rx) = EventSink::channel(64);
    let conversation = ConversationId::from("conv-e2e");

    run_turn(
        state.clone(),
        sink,
        conversation.clone(),
        Vec::new(),
        "say two things".into(),
        false,
        false,
    )
    .await;

    let events = drain(rx).await;

    assert!(events.iter().any(|e| matches!(e, ServerEvent::ChatSplit)));
    let saved: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::ChatMessageSaved { message_index, .. } => Some(*message_index),
            _ => None,
        })
        .collect();
    assert_eq!(saved, vec![0, 1]);
    assert!(matches!(
        events.last(),
        Some(ServerEvent::ChatComplete { message_count: 2 })
    ));

    // The user message, then one stored message per bubble.
    let stored = state
        .container
        .conversations
        .recent(&conversation, 10)
        .await
        .expect("history");
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[1].content, "Short thought.");
    assert_eq!(stored[2].content, "And a second one.");
}

#[tokio::test]
async fn consecutive_turns_share_one_history() {
    let model = ScriptedModel::texts(&["First reply.", "Second reply."]);
    let container = Container::builder().with_model(Arc::new(model)).build();
    let state = AppState::new(container);
    let conversation = ConversationId::from("conv-e2e");

    for text in ["opening message", "follow-up message"] {
        let (sink, rx) = EventSink::channel(64);
        run_turn(
            state.clone(),
            sink,
            conversation.clone(),
            Vec::new(),
            text.into(),
            false,
            false,
        )
        .await;
        let events = drain(rx).await;
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::ChatComplete { .. }))
        );
    }

    let stored = state
        .container
        .conversations
        .recent(&conversation, 10)
        .await
        .expect("history");
    let contents: Vec<&str> = stored.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "opening message",
            "First reply.",
            "follow-up message",
            "Second reply.",
        ]
    );
}
