use serde::{Deserialize, Serialize};

use super::id::SessionId;

/// One sequenced unit of pushed content.
///
/// `sequence` is assigned by the session registry and is strictly increasing
/// per session for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub session_id: SessionId,
    pub payload: String,
    pub sequence: u64,
}

impl NotificationEvent {
    #[must_use]
    pub fn new(session_id: SessionId, payload: impl Into<String>, sequence: u64) -> Self {
        Self {
            session_id,
            payload: payload.into(),
            sequence,
        }
    }
}
