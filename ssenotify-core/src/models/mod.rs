pub mod id;
pub mod notification;

pub use id::{SessionId, SESSION_ID_ALPHABET, SESSION_ID_LENGTH};
pub use notification::NotificationEvent;
