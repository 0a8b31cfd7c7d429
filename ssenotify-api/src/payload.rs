//! Notification payload generation

use ssenotify_core::SessionId;
use uuid::Uuid;

/// Produces the payload published by the fire endpoint.
pub trait PayloadSource: Send + Sync + 'static {
    fn next_payload(&self, session_id: &SessionId) -> String;
}

/// `"[<unix seconds>] New notify: <uuid v4>"`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPayloadSource;

impl PayloadSource for DefaultPayloadSource {
    fn next_payload(&self, _session_id: &SessionId) -> String {
        format!(
            "[{}] New notify: {}",
            chrono::Utc::now().timestamp(),
            Uuid::new_v4()
        )
    }
}

impl<F> PayloadSource for F
where
    F: Fn(&SessionId) -> String + Send + Sync + 'static,
{
    fn next_payload(&self, session_id: &SessionId) -> String {
        self(session_id)
    }
}
