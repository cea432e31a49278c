//! Synchronous publish/subscribe hub.
//!
//! The bus is constructed explicitly and shared as `Arc<EventBus>`; there is
//! no global instance. `publish` calls every handler subscribed to the
//! event's [`EventType`] in subscription order, on the publisher's task.
//!
//! A handler that returns an error or panics is logged and skipped. Neither
//! reaches the publisher or the remaining handlers.
//!
//! # Example
//!
//! ```
//! use rust_scan::events::{DomainEvent, EventBus, EventType};
//! use uuid::Uuid;
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(EventType::ScanCompleted, |event| {
//!     println!("done: {:?}", event);
//!     Ok(())
//! });
//! bus.publish(DomainEvent::ScanCompleted { scan_id: Uuid::nil(), total_points: 4 });
//! assert!(bus.unsubscribe(id));
//! ```

use super::domain::{DomainEvent, EventType};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event handler. Errors are logged by the bus.
pub type EventHandler = Arc<dyn Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    handler: EventHandler,
}

/// Publish/subscribe hub for [`DomainEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.read().len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler))
    }

    /// Subscribe one shared handler to several event types.
    pub fn subscribe_many<F>(&self, event_types: &[EventType], handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        event_types
            .iter()
            .map(|&event_type| self.subscribe_handler(event_type, Arc::clone(&handler)))
            .collect()
    }

    fn subscribe_handler(&self, event_type: EventType, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            event_type,
            handler,
        });
        tracing::trace!(event_type = %event_type, "subscriber added");
        id
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Remove every subscription to `event_type`, or every subscription when `None`.
    pub fn clear_subscribers(&self, event_type: Option<EventType>) {
        let mut subscriptions = self.subscriptions.write();
        match event_type {
            Some(event_type) => subscriptions.retain(|s| s.event_type != event_type),
            None => subscriptions.clear(),
        }
    }

    /// Number of handlers subscribed to `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.event_type == event_type)
            .count()
    }

    /// Deliver `event` to its subscribers. Returns how many handled it without error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let event_type = event.event_type();
        // Snapshot so handlers can (un)subscribe without deadlocking.
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.event_type == event_type)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::error!(event_type = %event_type, error = %err, "event handler failed");
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(event_type = %event_type, panic = %message, "event handler panicked");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn completed() -> DomainEvent {
        DomainEvent::ScanCompleted {
            scan_id: Uuid::nil(),
            total_points: 1,
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventType::ScanCompleted, move |_| {
                seen.lock().push(tag);
                Ok(())
            });
        }
        assert_eq!(bus.publish(completed()), 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn only_matching_type_is_delivered() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        bus.subscribe(EventType::ScanFailed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(bus.publish(completed()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[traced_test]
    #[test]
    fn failing_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));
        bus.subscribe(EventType::ScanCompleted, |_| anyhow::bail!("disk full"));
        bus.subscribe(EventType::ScanCompleted, |_| panic!("handler bug"));
        let counter = Arc::clone(&reached);
        bus.subscribe(EventType::ScanCompleted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(completed()), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert!(logs_contain("event handler failed"));
        assert!(logs_contain("handler bug"));
    }

    #[test]
    fn unsubscribe_and_clear() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventType::ScanCompleted, |_| Ok(()));
        bus.subscribe_many(&EventType::SCAN, |_| Ok(()));
        assert_eq!(bus.subscriber_count(EventType::ScanCompleted), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(EventType::ScanCompleted), 1);

        bus.clear_subscribers(Some(EventType::ScanStarted));
        assert_eq!(bus.subscriber_count(EventType::ScanStarted), 0);
        assert_eq!(bus.subscriber_count(EventType::ScanPaused), 1);

        bus.clear_subscribers(None);
        assert_eq!(bus.subscriber_count(EventType::ScanPaused), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (weak_bus, handler_slot) = (Arc::downgrade(&bus), Arc::clone(&slot));
        let id = bus.subscribe(EventType::ScanCompleted, move |_| {
            if let (Some(bus), Some(id)) = (weak_bus.upgrade(), *handler_slot.lock()) {
                bus.unsubscribe(id);
            }
            Ok(())
        });
        *slot.lock() = Some(id);

        assert_eq!(bus.publish(completed()), 1);
        assert_eq!(bus.subscriber_count(EventType::ScanCompleted), 0);
    }
}
