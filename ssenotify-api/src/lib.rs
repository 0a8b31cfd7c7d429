pub mod http;
pub mod observability;
pub mod payload;

pub use http::{create_router, AppState};
pub use payload::{DefaultPayloadSource, PayloadSource};
