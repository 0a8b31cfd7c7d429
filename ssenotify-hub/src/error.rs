//! Error types for the session hub

use thiserror::Error;

/// Failure to hand an event to a subscriber's transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport rejected event: {0}")]
    Rejected(String),
}
