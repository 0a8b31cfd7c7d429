pub mod error;
pub mod sync;

pub use error::TransportError;
pub use sync::{
    event_queue, Channel, ChannelId, ChannelState, EventQueue, HubMetrics, PublishResult,
    QueueTransport, SessionHub, Transport,
};
