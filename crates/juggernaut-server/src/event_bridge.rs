//! Turns a running session's event channel into a Server-Sent Events stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use juggernaut_core::events::SessionEvent;
use juggernaut_engine::SessionHandle;

use crate::sessions::ActiveSessions;

/// One SSE frame: `event:` is the session event type, `data:` its JSON.
pub fn to_sse_event(event: &SessionEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.event_type()).data(data),
        Err(e) => {
            tracing::warn!(error = %e, event_type = event.event_type(), "failed to serialize event");
            Event::default()
                .event("error")
                .data(r#"{"type":"error","code":"SERIALIZATION","message":"event could not be serialized"}"#)
        }
    }
}

/// Register the session, forget it once its task ends, and stream its events.
///
/// Dropping the returned stream drops the event receiver, which cancels the session.
pub fn bridge(
    handle: SessionHandle,
    sessions: Arc<ActiveSessions>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (session_id, events, cancel, join) = handle.into_parts();
    sessions.insert(session_id.clone(), cancel);

    tokio::spawn(async move {
        match join.await {
            Ok(outcome) => tracing::debug!(
                session_id = %session_id,
                stop_reason = outcome.stop_reason.as_ref().map(|r| r.code()).unwrap_or("none"),
                "session task finished"
            ),
            Err(e) => tracing::error!(session_id = %session_id, error = %e, "session task failed"),
        }
        sessions.remove(&session_id);
    });

    ReceiverStream::new(events).map(|event| Ok(to_sse_event(&event)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_the_tagged_json() {
        let json = serde_json::to_string(&SessionEvent::Token { delta: "hi".into() }).unwrap();
        assert_eq!(json, r#"{"type":"token","delta":"hi"}"#);
    }
}
