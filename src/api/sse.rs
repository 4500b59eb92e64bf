//! Server-Sent Events support

use crate::llm::StreamEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Stream a chat turn: a `session` event, then every [`StreamEvent`] in order.
///
/// Dropping the response (client disconnect) cancels `cancel`.
pub fn chat_stream(
    session_id: String,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let guard = cancel.drop_guard();

    let init = futures::stream::once(async move {
        Ok(Event::default()
            .event("session")
            .data(json!({ "type": "session", "session_id": session_id }).to_string()))
    });

    let updates = ReceiverStream::new(events).map(move |event| {
        let _guard = &guard;
        Ok(stream_event_to_axum(event))
    });

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn stream_event_to_axum(event: StreamEvent) -> Event {
    let (event_type, data) = match event {
        StreamEvent::TextDelta(text) => (
            "text_delta",
            json!({
                "type": "text_delta",
                "text": text
            }),
        ),
        StreamEvent::ThinkingDelta(text) => (
            "thinking_delta",
            json!({
                "type": "thinking_delta",
                "text": text
            }),
        ),
        StreamEvent::Complete => (
            "complete",
            json!({
                "type": "complete"
            }),
        ),
        StreamEvent::Error(message) => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
