//! Live progress stream over SSE
//!
//! Each connection subscribes a fresh listener for the requested subject and
//! streams its events as server-sent events. Reconnecting clients receive
//! only future events — there is no backlog. When the client disconnects the
//! stream (and with it the listener's receiver) drops, and the broadcaster
//! forgets the listener on its next publish to that subject.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use futures_util::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::routes::AppState;

/// GET /users/:user_id/events — push channel of progress events.
pub async fn subscribe_events(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let listener = state.broadcaster.subscribe(&user_id).await;
    debug!(subject_id = user_id, listener_id = %listener.id(), "event stream opened");

    let stream = UnboundedReceiverStream::new(listener.into_receiver()).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"));
        Ok(Event::default().event(kind_name(&event)).data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn kind_name(event: &progress::ProgressEvent) -> &'static str {
    match event.kind {
        progress::EventKind::Preventive => "preventive",
        progress::EventKind::Refreshed => "refreshed",
        progress::EventKind::Recovery => "recovery",
        progress::EventKind::SyncProgress => "sync_progress",
        progress::EventKind::Error => "error",
    }
}
