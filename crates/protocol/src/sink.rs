//! The per-client event channel.
//!
//! Every engine that reports progress holds an [`EventSink`]; the gateway
//! drains the matching receiver into the WebSocket. One sink per client
//! keeps event delivery a single ordered stream regardless of how many
//! sessions feed it.

use tokio::sync::mpsc;

use crate::event::ServerEvent;

/// Sending half of a client's event channel. Cheap to clone; every active
/// session for a client holds one.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ServerEvent>,
}

impl EventSink {
    /// Create a sink and its receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// A sink with no listener; emitted events vanish. Test wiring only
    /// needs somewhere for events to go.
    pub fn null() -> Self {
        let (sink, rx) = Self::channel(1);
        drop(rx);
        sink
    }

    /// Emit one event. A closed channel means the client disconnected;
    /// the event is dropped and the session keeps running to completion.
    pub async fn emit(&self, event: ServerEvent) {
        let kind = event.kind();
        if self.tx.send(event).await.is_err() {
            tracing::debug!(kind, "event dropped, client channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emit_order() {
        let (sink, mut rx) = EventSink::channel(8);
        sink.emit(ServerEvent::ChatToken {
            message_index: 0,
            text: "a".into(),
        })
        .await;
        sink.emit(ServerEvent::ChatSplit).await;
        sink.emit(ServerEvent::ChatComplete { message_count: 2 }).await;

        assert_eq!(rx.recv().await.unwrap().kind(), "chat.token");
        assert_eq!(rx.recv().await.unwrap().kind(), "chat.split");
        assert_eq!(rx.recv().await.unwrap().kind(), "chat.complete");
    }

    #[tokio::test]
    async fn null_sink_swallows_events() {
        let sink = EventSink::null();
        assert!(sink.is_closed());
        sink.emit(ServerEvent::ChatSplit).await;
    }
}
