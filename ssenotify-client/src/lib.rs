//! Client side of the notification service: session id persistence, an
//! incremental `text/event-stream` decoder and a reconnecting stream agent.

pub mod agent;
pub mod error;
pub mod session;
pub mod sse;

pub use agent::{FireAck, NotifyClient, ReconnectPolicy};
pub use error::{Error, Result};
pub use session::{FileSessionStore, SessionIdSource, StaticSessionId, SESSION_ID_KEY};
pub use sse::{ServerEvent, SseDecoder};
