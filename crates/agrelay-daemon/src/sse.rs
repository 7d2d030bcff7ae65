use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

use agrelay_runtime::Coordinator;
use agrelay_types::SessionEvent;

use crate::state::AppState;

/// SSE subscription to a session's uniform event stream. The first frames
/// are `connected`, a `heartbeat`, and a replay of open prompts; closing
/// the connection unsubscribes the client.
pub async fn events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<EventStream> {
    let subscription = state.daemon.coordinator().subscribe(&session_id).await;
    let stream = EventStream {
        rx: subscription.rx,
        client_id: subscription.client_id,
        coordinator: Arc::clone(state.daemon.coordinator()),
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub struct EventStream {
    rx: mpsc::Receiver<SessionEvent>,
    client_id: Uuid,
    coordinator: Arc<Coordinator>,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|next| {
            next.map(|event| {
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Ok(Event::default().event(event.kind()).data(data))
            })
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let client_id = self.client_id;
        tokio::spawn(async move {
            coordinator.unsubscribe(client_id).await;
        });
    }
}
