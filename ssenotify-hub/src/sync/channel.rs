use ssenotify_core::{NotificationEvent, SessionId};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::transport::Transport;
use crate::error::TransportError;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier (diagnostics only; identity is by instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Lifecycle of a [`Channel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ChannelState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

struct ChannelInner {
    id: ChannelId,
    session_id: SessionId,
    state: AtomicU8,
    transport: Box<dyn Transport>,
    opened_at: Instant,
}

/// Live binding of a session to one outbound transport.
///
/// Cloning yields another handle to the same channel; two handles are the
/// same channel only if [`Channel::same_as`] says so.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn open(session_id: SessionId, transport: impl Transport) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                id: ChannelId::next(),
                session_id,
                state: AtomicU8::new(ChannelState::Open as u8),
                transport: Box::new(transport),
                opened_at: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.inner.opened_at.elapsed()
    }

    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write an event to the transport. Fails once the channel left `Open`.
    pub(crate) fn deliver(&self, event: NotificationEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.inner.transport.send(event)
    }

    /// Move `Open -> Closing` and close the transport.
    ///
    /// Returns `true` only for the call that performed the transition, so the
    /// transport is closed exactly once.
    pub(crate) fn begin_close(&self) -> bool {
        let transitioned = self
            .inner
            .state
            .compare_exchange(
                ChannelState::Open as u8,
                ChannelState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if transitioned {
            self.inner.transport.close();
        }
        transitioned
    }

    pub(crate) fn mark_closed(&self) {
        self.begin_close();
        self.inner
            .state
            .store(ChannelState::Closed as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::transport::event_queue;

    fn session() -> SessionId {
        SessionId::parse("abc123").unwrap()
    }

    #[test]
    fn test_channel_ids_are_unique() {
        let (t1, _q1) = event_queue();
        let (t2, _q2) = event_queue();
        let a = Channel::open(session(), t1);
        let b = Channel::open(session(), t2);

        assert_ne!(a.id(), b.id());
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn test_state_transitions() {
        let (transport, queue) = event_queue();
        let channel = Channel::open(session(), transport);
        assert_eq!(channel.state(), ChannelState::Open);

        assert!(channel.begin_close());
        assert_eq!(channel.state(), ChannelState::Closing);
        assert!(queue.is_closed());

        // Second close is a no-op
        assert!(!channel.begin_close());

        channel.mark_closed();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_deliver_refused_after_close() {
        let (transport, _queue) = event_queue();
        let channel = Channel::open(session(), transport);
        channel.begin_close();

        let event = NotificationEvent::new(session(), "late", 1);
        assert_eq!(channel.deliver(event), Err(TransportError::Closed));
    }
}
