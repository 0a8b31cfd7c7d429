//! Notification HTTP endpoints
//!
//! `fire` publishes a generated payload to a session; `stream` holds a
//! `text/event-stream` response open and relays that session's events.

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use ssenotify_core::{NotificationEvent, SessionId};
use ssenotify_hub::{event_queue, Channel, EventQueue, SessionHub};
use std::convert::Infallible;

use crate::http::{AppResult, AppState};
use crate::observability::metrics::STREAMS_ACTIVE;

const FIRE_ACK_MESSAGE: &str = "Notify sent . . .";

pub fn create_notification_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/notifications/{session_id}/fire",
            get(fire_notification),
        )
        .route(
            "/api/v1/notifications/{session_id}/stream",
            get(stream_notifications),
        )
}

/// Acknowledgement returned by the fire endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct FireResponse {
    pub message: String,
    pub session_id: SessionId,
    /// Sequence assigned to the event; `null` for a session nobody subscribed to
    pub sequence: Option<u64>,
}

/// GET /api/v1/notifications/{session_id}/fire
///
/// Answers 200 whether or not a subscriber received the event.
pub async fn fire_notification(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<FireResponse>> {
    let session_id = SessionId::parse(session_id)?;
    let payload = state.payload_source.next_payload(&session_id);
    let result = state.hub.publish(&session_id, payload);

    Ok(Json(FireResponse {
        message: FIRE_ACK_MESSAGE.to_string(),
        session_id,
        sequence: result.sequence(),
    }))
}

/// GET /api/v1/notifications/{session_id}/stream
///
/// Replaces any existing stream for the session. The stream ends when the
/// client disconnects, a newer stream evicts this one, or the server shuts down.
pub async fn stream_notifications(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let session_id = SessionId::parse(session_id)?;

    let (transport, queue) = event_queue();
    let channel = state.hub.subscribe(session_id, transport);
    let subscription = Subscription::new(state.hub.clone(), channel, queue);

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.queue.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&event)), subscription))
    });

    let sse = Sse::new(stream);
    Ok(match state.keep_alive {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response(),
        None => sse.into_response(),
    })
}

/// `id: <sequence>` followed by the payload as `data`
fn sse_event(event: &NotificationEvent) -> Event {
    Event::default()
        .id(event.sequence.to_string())
        .data(normalize_line_breaks(&event.payload))
}

/// Rewrite `\r\n` and lone `\r` as `\n`.
///
/// Any of the three ends a line on the wire, but only `\n` is split into
/// separate `data:` lines when the event is encoded.
fn normalize_line_breaks(payload: &str) -> String {
    payload.replace("\r\n", "\n").replace('\r', "\n")
}

/// Owns one subscriber's side of a stream and unregisters it when dropped.
struct Subscription {
    hub: SessionHub,
    channel: Channel,
    queue: EventQueue,
}

impl Subscription {
    fn new(hub: SessionHub, channel: Channel, queue: EventQueue) -> Self {
        STREAMS_ACTIVE.inc();
        Self {
            hub,
            channel,
            queue,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        STREAMS_ACTIVE.dec();
        self.hub
            .unsubscribe(self.channel.session_id(), &self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadSource;
    use axum::body::{Body, Bytes};
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        let payload = |session: &SessionId| format!("ping {session}");
        AppState::new(SessionHub::new(), payload).with_keep_alive(None)
    }

    fn app(state: &AppState) -> Router {
        create_notification_router().with_state(state.clone())
    }

    async fn get(state: &AppState, uri: &str) -> Response {
        app(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn next_chunk(response: &mut Response) -> Option<Bytes> {
        let frame = tokio::time::timeout(Duration::from_secs(1), response.body_mut().frame())
            .await
            .expect("timed out waiting for body frame")?;
        frame.unwrap().into_data().ok()
    }

    fn sid(id: &str) -> SessionId {
        SessionId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_fire_without_subscriber_acknowledges() {
        let state = state();
        let response = get(&state, "/api/v1/notifications/abc123/fire").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let ack: FireResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(ack.message, FIRE_ACK_MESSAGE);
        assert_eq!(ack.session_id, sid("abc123"));
        assert_eq!(ack.sequence, None);
        assert!(!state.hub.contains_session(&sid("abc123")));
    }

    #[tokio::test]
    async fn test_blank_session_id_is_rejected() {
        let state = state();
        let response = get(&state, "/api/v1/notifications/%20/fire").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&state, "/api/v1/notifications/%20/stream").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_session_id_is_rejected() {
        let state = state();
        let response = get(&state, "/api/v1/notifications//fire").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(&state, "/api/v1/notifications//stream").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_relays_fired_events() {
        let state = state();
        let mut stream = get(&state, "/api/v1/notifications/abc123/stream").await;
        assert_eq!(stream.status(), StatusCode::OK);
        assert_eq!(
            stream.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert!(state.hub.active_channel(&sid("abc123")).is_some());

        let fired = get(&state, "/api/v1/notifications/abc123/fire").await;
        let body = fired.into_body().collect().await.unwrap().to_bytes();
        let ack: FireResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(ack.sequence, Some(1));

        let chunk = next_chunk(&mut stream).await.unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("id: 1\n"));
        assert!(text.contains("data: ping abc123\n"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_second_stream_evicts_first() {
        let state = state();
        let mut first = get(&state, "/api/v1/notifications/tab/stream").await;
        let mut second = get(&state, "/api/v1/notifications/tab/stream").await;

        // The evicted stream ends
        assert!(next_chunk(&mut first).await.is_none());

        state.hub.publish(&sid("tab"), "only for the new tab");
        let chunk = next_chunk(&mut second).await.unwrap();
        assert!(String::from_utf8_lossy(&chunk).contains("only for the new tab"));

        // Dropping the evicted body must leave the newer registration intact
        drop(first);
        assert!(state.hub.active_channel(&sid("tab")).is_some());
    }

    #[tokio::test]
    async fn test_client_disconnect_unsubscribes() {
        let state = state();
        let stream = get(&state, "/api/v1/notifications/s1/stream").await;
        assert!(state.hub.active_channel(&sid("s1")).is_some());

        drop(stream);
        assert!(state.hub.active_channel(&sid("s1")).is_none());

        let result = state.hub.publish(&sid("s1"), "too late");
        assert!(!result.is_delivered());
    }

    #[tokio::test]
    async fn test_multiline_payload_is_split_into_data_lines() {
        struct TwoLines;
        impl PayloadSource for TwoLines {
            fn next_payload(&self, _session_id: &SessionId) -> String {
                "first\nsecond".to_string()
            }
        }

        let state = AppState::new(SessionHub::new(), TwoLines).with_keep_alive(None);
        let mut stream = get(&state, "/api/v1/notifications/s1/stream").await;
        get(&state, "/api/v1/notifications/s1/fire").await;

        let chunk = next_chunk(&mut stream).await.unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("data: first\ndata: second\n"));
    }

    #[tokio::test]
    async fn test_carriage_returns_become_separate_data_lines() {
        let payload = |_: &SessionId| "line1\r\nline2\rline3".to_string();
        let state = AppState::new(SessionHub::new(), payload).with_keep_alive(None);
        let mut stream = get(&state, "/api/v1/notifications/s1/stream").await;
        get(&state, "/api/v1/notifications/s1/fire").await;

        let chunk = next_chunk(&mut stream).await.unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(!text.contains('\r'));
        assert!(text.contains("data: line1\ndata: line2\ndata: line3\n"));
    }

    #[test]
    fn test_normalize_line_breaks() {
        assert_eq!(normalize_line_breaks("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(normalize_line_breaks("plain"), "plain");
    }
}
