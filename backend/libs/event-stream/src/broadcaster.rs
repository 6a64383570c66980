//! Per-subscriber bounded event queues with non-blocking fan-out.
//!
//! The subscriber table is guarded by a `std::sync::RwLock`: subscribe and
//! unsubscribe take the exclusive lock (rare, short), broadcast takes the
//! shared lock for the duration of its iteration. No await point ever runs
//! under the lock, so a synchronous lock is both safe and cheaper than an
//! async one here.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::event::{DonationEvent, EventType};

/// Capacity of each subscriber's event queue. When a consumer falls this
/// far behind, further events are dropped for that consumer only.
pub const EVENT_BUFFER_CAPACITY: usize = 100;

struct SubscriberEntry {
    id: Uuid,
    filter: Option<HashSet<EventType>>,
    sender: mpsc::Sender<DonationEvent>,
}

impl SubscriberEntry {
    fn wants(&self, event_type: EventType) -> bool {
        match &self.filter {
            Some(allowed) => allowed.contains(&event_type),
            None => true,
        }
    }
}

type SubscriberTable = HashMap<i64, Vec<SubscriberEntry>>;

/// Outcome of a single broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Subscribers whose queue accepted the event.
    pub delivered: usize,
    /// Subscribers whose queue was full; the event is lost for them.
    pub dropped: usize,
}

/// Fan-out broadcaster for donation events.
///
/// Cheap to clone; all clones share one subscriber table. Delivery is
/// at-most-once: a full queue drops the event for that subscriber, a slow
/// consumer never delays delivery to the others, and `broadcast` never
/// blocks or fails regardless of subscriber state.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<RwLock<SubscriberTable>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription for `user_id`.
    ///
    /// An empty filter set means "all event types". Each call creates an
    /// independent entry: subscribing twice for the same user yields two
    /// streams that each receive their own copy of every event, and
    /// dropping one never touches the other.
    pub fn subscribe(&self, user_id: i64, filter: Option<HashSet<EventType>>) -> Subscription {
        let filter = filter.filter(|allowed| !allowed.is_empty());
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER_CAPACITY);
        let id = Uuid::new_v4();

        self.write_table().entry(user_id).or_default().push(SubscriberEntry {
            id,
            filter,
            sender,
        });
        debug!(user_id, subscription_id = %id, "event subscription registered");

        Subscription {
            user_id,
            id,
            receiver,
            broadcaster: self.clone(),
        }
    }

    /// Deliver `event` to every subscriber whose filter accepts it.
    ///
    /// Completes in time proportional to the subscriber count: each send is
    /// a `try_send`, so a full queue costs nothing and the event is simply
    /// dropped for that subscriber.
    pub fn broadcast(&self, event: &DonationEvent) -> BroadcastStats {
        let table = self.read_table();
        let mut stats = BroadcastStats::default();

        for (user_id, entries) in table.iter() {
            for entry in entries {
                if !entry.wants(event.event_type) {
                    continue;
                }
                match entry.sender.try_send(event.clone()) {
                    Ok(()) => stats.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        stats.dropped += 1;
                        debug!(
                            user_id,
                            subscription_id = %entry.id,
                            event_type = %event.event_type,
                            "subscriber queue full, event dropped"
                        );
                    }
                    // Receiver already gone; the entry is removed when the
                    // Subscription handle finishes dropping.
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }

        stats
    }

    /// Total number of live subscriptions across all users.
    pub fn subscriber_count(&self) -> usize {
        self.read_table().values().map(Vec::len).sum()
    }

    /// Number of live subscriptions registered for one user.
    pub fn user_subscription_count(&self, user_id: i64) -> usize {
        self.read_table().get(&user_id).map_or(0, Vec::len)
    }

    fn remove(&self, user_id: i64, id: Uuid) {
        let mut table = self.write_table();
        if let Some(entries) = table.get_mut(&user_id) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                table.remove(&user_id);
            }
        }
        debug!(user_id, subscription_id = %id, "event subscription removed");
    }

    // A panic can never occur while the lock is held (no user code runs
    // under it), so poisoning is unreachable; recover rather than unwind.
    fn read_table(&self) -> RwLockReadGuard<'_, SubscriberTable> {
        match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, SubscriberTable> {
        match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owned handle for one subscription.
///
/// Receives events via [`Subscription::recv`] or the [`Stream`] impl.
/// Dropping the handle unregisters the subscription and closes its queue;
/// there is no other way out of the subscribed state, and a later
/// re-subscribe is a brand-new entry.
pub struct Subscription {
    user_id: i64,
    id: Uuid,
    receiver: mpsc::Receiver<DonationEvent>,
    broadcaster: EventBroadcaster,
}

impl Subscription {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Wait for the next event. Returns `None` once the subscription has
    /// been torn down and the queue drained.
    pub async fn recv(&mut self) -> Option<DonationEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<DonationEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Stream for Subscription {
    type Item = DonationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.remove(self.user_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn starts_empty() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.user_subscription_count(1), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let mut subs: Vec<Subscription> =
            (1..=3).map(|uid| broadcaster.subscribe(uid, None)).collect();

        let event = DonationEvent::donation_created(1, 7, 5000.0, "IDR");
        let stats = broadcaster.broadcast(&event);
        assert_eq!(stats, BroadcastStats { delivered: 3, dropped: 0 });

        for sub in &mut subs {
            assert_eq!(sub.recv().await, Some(event.clone()));
        }
    }

    #[tokio::test]
    async fn filter_skips_unwanted_event_types() {
        let broadcaster = EventBroadcaster::new();
        let mut payments_only = broadcaster.subscribe(
            1,
            Some([EventType::PaymentVerified].into_iter().collect()),
        );
        let mut everything = broadcaster.subscribe(2, None);

        broadcaster.broadcast(&DonationEvent::donation_created(1, 7, 100.0, "USD"));
        broadcaster.broadcast(&DonationEvent::payment_verified(1, "trx-1"));

        // The filtered subscriber sees only the payment event.
        let first = payments_only.recv().await.expect("payment event");
        assert_eq!(first.event_type, EventType::PaymentVerified);
        assert!(payments_only.try_recv().is_err());

        assert_eq!(
            everything.recv().await.map(|e| e.event_type),
            Some(EventType::DonationCreated)
        );
        assert_eq!(
            everything.recv().await.map(|e| e.event_type),
            Some(EventType::PaymentVerified)
        );
    }

    #[tokio::test]
    async fn empty_filter_means_all_events() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe(1, Some(HashSet::new()));

        broadcaster.broadcast(&DonationEvent::donation_created(1, 7, 100.0, "USD"));
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_subscriber_only() {
        let broadcaster = EventBroadcaster::new();
        let mut slow = broadcaster.subscribe(1, None);
        let mut healthy = broadcaster.subscribe(2, None);

        // Saturate the slow subscriber's queue.
        for i in 0..EVENT_BUFFER_CAPACITY {
            let stats =
                broadcaster.broadcast(&DonationEvent::payment_verified(i as i64, "trx"));
            assert_eq!(stats.dropped, 0);
            // Keep the healthy subscriber drained so only `slow` fills up.
            assert!(healthy.recv().await.is_some());
        }

        let overflow = DonationEvent::donation_created(999, 7, 1.0, "USD");
        let stats = broadcaster.broadcast(&overflow);
        assert_eq!(stats, BroadcastStats { delivered: 1, dropped: 1 });

        assert_eq!(healthy.recv().await, Some(overflow.clone()));

        // The slow subscriber drains its backlog but never sees the
        // overflow event.
        let mut seen = Vec::new();
        while let Ok(event) = slow.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), EVENT_BUFFER_CAPACITY);
        assert!(seen.iter().all(|e| *e != overflow));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let broadcaster = EventBroadcaster::new();
        let sub = broadcaster.subscribe(1, None);
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);

        let stats = broadcaster.broadcast(&DonationEvent::payment_verified(1, "trx"));
        assert_eq!(stats, BroadcastStats::default());
    }

    #[tokio::test]
    async fn same_user_subscriptions_are_independent() {
        let broadcaster = EventBroadcaster::new();
        let mut first = broadcaster.subscribe(1, None);
        let second = broadcaster.subscribe(1, None);
        assert_eq!(broadcaster.user_subscription_count(1), 2);

        // Dropping one entry leaves the other delivering.
        drop(second);
        assert_eq!(broadcaster.user_subscription_count(1), 1);

        let event = DonationEvent::payment_verified(1, "trx");
        let stats = broadcaster.broadcast(&event);
        assert_eq!(stats.delivered, 1);
        assert_eq!(first.recv().await, Some(event));
    }

    #[tokio::test]
    async fn subscription_works_as_a_stream() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe(1, None);

        let event = DonationEvent::donation_created(3, 7, 250.0, "EUR");
        broadcaster.broadcast(&event);

        assert_eq!(sub.next().await, Some(event));
    }
}
