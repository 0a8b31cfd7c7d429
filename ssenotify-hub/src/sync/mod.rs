// Module: sync

pub mod channel;
pub mod session_hub;
pub mod transport;

pub use channel::{Channel, ChannelId, ChannelState};
pub use session_hub::{HubMetrics, PublishResult, SessionHub};
pub use transport::{event_queue, EventQueue, QueueTransport, Transport};
