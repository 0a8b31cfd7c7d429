use dashmap::DashMap;
use parking_lot::Mutex;
use ssenotify_core::{NotificationEvent, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::transport::Transport;

/// Outcome of [`SessionHub::publish`]. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    /// Handed to the session's active channel
    Delivered { sequence: u64 },
    /// No live subscriber. `sequence` is `None` when the session has never
    /// subscribed, since such sessions have no counter.
    Dropped { sequence: Option<u64> },
}

impl PublishResult {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        match self {
            Self::Delivered { sequence } => Some(*sequence),
            Self::Dropped { sequence } => *sequence,
        }
    }
}

/// Per-session state. Every mutation happens under the slot's own mutex.
#[derive(Debug)]
struct SessionSlot {
    next_sequence: u64,
    active: Option<Channel>,
    last_activity: Instant,
    /// Set when the sweeper removed the slot from the map
    retired: bool,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            next_sequence: 1,
            active: None,
            last_activity: Instant::now(),
            retired: false,
        }
    }
}

type SharedSlot = Arc<Mutex<SessionSlot>>;

/// Hub counters
#[derive(Debug, Default)]
struct HubCounters {
    subscriptions: AtomicU64,
    evictions: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of hub state for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMetrics {
    pub sessions: usize,
    pub active_channels: usize,
    pub total_subscriptions: u64,
    pub total_evictions: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
}

/// Registry mapping each session to at most one live delivery channel.
///
/// Sessions are independent: the map is sharded and each session has its
/// own lock, so publishing to one session never waits on another.
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<DashMap<SessionId, SharedSlot>>,
    counters: Arc<HubCounters>,
}

impl SessionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` as the session's only subscriber.
    ///
    /// A previously registered channel is evicted: its transport is closed so
    /// the stale connection ends and the old subscriber sees a disconnect.
    pub fn subscribe(&self, session_id: SessionId, transport: impl Transport) -> Channel {
        let channel = Channel::open(session_id.clone(), transport);

        let evicted = loop {
            let slot = self.slot_or_insert(&session_id);
            let mut slot = slot.lock();
            if slot.retired {
                // Lost a race with the sweeper; retry with a fresh slot
                continue;
            }
            slot.last_activity = Instant::now();
            break slot.active.replace(channel.clone());
        };

        self.counters.subscriptions.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = evicted {
            old.begin_close();
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            info!(
                session_id = %session_id,
                evicted_channel = %old.id(),
                channel_id = %channel.id(),
                "Evicted previous channel for session"
            );
        } else {
            info!(
                session_id = %session_id,
                channel_id = %channel.id(),
                "Client subscribed to session"
            );
        }

        channel
    }

    /// Assign the next sequence number and hand the event to the active
    /// channel, if any. Never blocks on the consumer.
    pub fn publish(&self, session_id: &SessionId, payload: impl Into<String>) -> PublishResult {
        let Some(slot) = self.slot(session_id) else {
            return self.dropped(session_id, None);
        };

        let mut slot = slot.lock();
        if slot.retired {
            return self.dropped(session_id, None);
        }

        let sequence = slot.next_sequence;
        slot.next_sequence += 1;
        slot.last_activity = Instant::now();

        let Some(channel) = slot.active.clone() else {
            return self.dropped(session_id, Some(sequence));
        };

        let event = NotificationEvent::new(session_id.clone(), payload, sequence);
        match channel.deliver(event) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    session_id = %session_id,
                    channel_id = %channel.id(),
                    sequence = sequence,
                    "Notification delivered"
                );
                PublishResult::Delivered { sequence }
            }
            Err(err) => {
                // The reader went away before unsubscribing; release the channel now
                warn!(
                    session_id = %session_id,
                    channel_id = %channel.id(),
                    sequence = sequence,
                    error = %err,
                    "Failed to deliver notification, releasing channel"
                );
                slot.active = None;
                channel.mark_closed();
                self.dropped(session_id, Some(sequence))
            }
        }
    }

    /// Release `channel` after its connection ended.
    ///
    /// Only clears the session's registration when `channel` is still the
    /// registered one. Returns whether the registration was cleared.
    pub fn unsubscribe(&self, session_id: &SessionId, channel: &Channel) -> bool {
        let removed = self.slot(session_id).is_some_and(|slot| {
            let mut slot = slot.lock();
            slot.last_activity = Instant::now();
            if slot.active.as_ref().is_some_and(|c| c.same_as(channel)) {
                slot.active = None;
                true
            } else {
                false
            }
        });

        channel.mark_closed();

        if removed {
            info!(
                session_id = %session_id,
                channel_id = %channel.id(),
                duration = ?channel.age(),
                "Client unsubscribed from session"
            );
        } else {
            debug!(
                session_id = %session_id,
                channel_id = %channel.id(),
                "Ignoring unsubscribe for a channel that is no longer registered"
            );
        }

        removed
    }

    /// The currently registered channel for a session
    #[must_use]
    pub fn active_channel(&self, session_id: &SessionId) -> Option<Channel> {
        self.slot(session_id)
            .and_then(|slot| slot.lock().active.clone())
    }

    /// Whether the session has ever subscribed (and was not swept since)
    #[must_use]
    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn active_channel_count(&self) -> usize {
        self.snapshot_slots()
            .iter()
            .filter(|slot| slot.lock().active.is_some())
            .count()
    }

    /// Forget sessions that have no subscriber and saw no activity for
    /// `max_idle`. Their sequence counters restart if they come back.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session_id, slot| {
            let mut slot = slot.lock();
            let idle = slot.active.is_none() && slot.last_activity.elapsed() >= max_idle;
            if idle {
                slot.retired = true;
                debug!(session_id = %session_id, "Pruned idle session");
            }
            !idle
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Close every active channel, e.g. on shutdown. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for slot in self.snapshot_slots() {
            let channel = slot.lock().active.clone();
            if let Some(channel) = channel {
                if channel.begin_close() {
                    closed += 1;
                }
            }
        }
        if closed > 0 {
            info!(closed = closed, "Closed all active channels");
        }
        closed
    }

    /// Periodically prune idle sessions until `cancel` fires
    #[must_use]
    pub fn spawn_idle_sweeper(
        &self,
        ttl: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Idle session sweeper cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        let pruned = hub.prune_idle(ttl);
                        if pruned > 0 {
                            info!(pruned = pruned, remaining = hub.session_count(), "Pruned idle sessions");
                        }
                    }
                }
            }
        })
    }

    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            sessions: self.session_count(),
            active_channels: self.active_channel_count(),
            total_subscriptions: self.counters.subscriptions.load(Ordering::Relaxed),
            total_evictions: self.counters.evictions.load(Ordering::Relaxed),
            total_delivered: self.counters.delivered.load(Ordering::Relaxed),
            total_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, session_id: &SessionId) -> Option<SharedSlot> {
        self.sessions.get(session_id).map(|slot| slot.value().clone())
    }

    fn slot_or_insert(&self, session_id: &SessionId) -> SharedSlot {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::new())))
            .value()
            .clone()
    }

    /// Clone slot handles out so no map shard stays locked while slots are locked
    fn snapshot_slots(&self) -> Vec<SharedSlot> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    fn dropped(&self, session_id: &SessionId, sequence: Option<u64>) -> PublishResult {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(
            session_id = %session_id,
            sequence = ?sequence,
            "No active subscriber, notification dropped"
        );
        PublishResult::Dropped { sequence }
    }
}
