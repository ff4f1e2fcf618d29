//! Pin value-changed subscriptions
//!
//! The controller owns one [`SubscriberRegistry`] and hands a clone of the
//! [`EventSink`] to its backend. The backend's monitor thread calls
//! [`SubscriberRegistry::dispatch`] for every edge it observes; callbacks run
//! on that thread, never on the caller that registered them.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pin::{PinEventTypes, PinValueChangedEvent};

/// Callback invoked for a matching edge
pub type PinChangeCallback = Arc<dyn Fn(&PinValueChangedEvent) + Send + Sync>;

/// Shared handle through which backends deliver edges
pub type EventSink = Arc<SubscriberRegistry>;

/// Token returned by a registration, used to unregister it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    /// Pin number as the subscriber knows it
    pin: u32,
    event_types: PinEventTypes,
    callback: PinChangeCallback,
}

/// Subscriber list keyed by logical pin number
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    by_pin: RwLock<HashMap<u32, Vec<Subscription>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; the flag is true when it is the first for the pin
    pub fn subscribe(
        &self,
        logical_pin: u32,
        pin: u32,
        event_types: PinEventTypes,
        callback: PinChangeCallback,
    ) -> (SubscriptionId, bool) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut by_pin = self.by_pin.write();
        let list = by_pin.entry(logical_pin).or_default();
        let first = list.is_empty();
        list.push(Subscription {
            id,
            pin,
            event_types,
            callback,
        });
        (id, first)
    }

    /// Remove one subscription.
    ///
    /// Returns `None` when the id is unknown for this pin, otherwise whether
    /// the removed subscription was the pin's last one.
    pub fn unsubscribe(&self, logical_pin: u32, id: SubscriptionId) -> Option<bool> {
        let mut by_pin = self.by_pin.write();
        let list = by_pin.get_mut(&logical_pin)?;
        let index = list.iter().position(|s| s.id == id)?;
        list.remove(index);
        if list.is_empty() {
            by_pin.remove(&logical_pin);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Drop every subscription of a pin, returning how many were removed
    pub fn remove_pin(&self, logical_pin: u32) -> usize {
        self.by_pin
            .write()
            .remove(&logical_pin)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.by_pin.write().clear();
    }

    pub fn subscriber_count(&self, logical_pin: u32) -> usize {
        self.by_pin
            .read()
            .get(&logical_pin)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Invoke every subscription of `logical_pin` whose mask includes `edge`.
    ///
    /// The registry lock is released before any callback runs, so callbacks
    /// may register or unregister. A panicking callback is logged and the
    /// remaining callbacks still run. Returns the number of callbacks that
    /// completed normally.
    pub fn dispatch(&self, logical_pin: u32, edge: PinEventTypes) -> usize {
        if edge.is_none() {
            return 0;
        }

        let targets: Vec<(u32, PinChangeCallback)> = {
            let by_pin = self.by_pin.read();
            match by_pin.get(&logical_pin) {
                Some(list) => list
                    .iter()
                    .filter(|s| s.event_types.contains(edge))
                    .map(|s| (s.pin, Arc::clone(&s.callback)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (pin, callback) in targets {
            let event = PinValueChangedEvent {
                pin,
                change_type: edge,
            };
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!(
                    "Value-changed callback for pin {} panicked on {} edge",
                    pin,
                    edge
                ),
            }
        }
        delivered
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let by_pin = self.by_pin.read();
        let counts: HashMap<u32, usize> = by_pin.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("SubscriberRegistry")
            .field("subscriptions", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, PinChangeCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let callback: PinChangeCallback = Arc::new(move |_event| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        (hits, callback)
    }

    #[test]
    fn test_first_and_last_subscription_flags() {
        let registry = SubscriberRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();

        let (id_a, first) = registry.subscribe(4, 4, PinEventTypes::Rising, a);
        assert!(first);
        let (id_b, first) = registry.subscribe(4, 4, PinEventTypes::Both, b);
        assert!(!first);
        assert_eq!(registry.subscriber_count(4), 2);

        assert_eq!(registry.unsubscribe(4, id_a), Some(false));
        assert_eq!(registry.unsubscribe(4, id_a), None);
        assert_eq!(registry.unsubscribe(4, id_b), Some(true));
        assert_eq!(registry.subscriber_count(4), 0);
    }

    #[test]
    fn test_dispatch_filters_by_edge() {
        let registry = SubscriberRegistry::new();
        let (rising_hits, rising) = counter();
        let (falling_hits, falling) = counter();
        registry.subscribe(7, 26, PinEventTypes::Rising, rising);
        registry.subscribe(7, 26, PinEventTypes::Falling, falling);

        assert_eq!(registry.dispatch(7, PinEventTypes::Rising), 1);
        assert_eq!(registry.dispatch(7, PinEventTypes::Falling), 1);
        assert_eq!(registry.dispatch(7, PinEventTypes::None), 0);
        assert_eq!(registry.dispatch(8, PinEventTypes::Rising), 0);

        assert_eq!(rising_hits.load(Ordering::SeqCst), 1);
        assert_eq!(falling_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_reports_subscriber_pin_number() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        registry.subscribe(
            4,
            7,
            PinEventTypes::Both,
            Arc::new(move |event| {
                seen_clone.store(event.pin as usize, Ordering::SeqCst);
            }),
        );
        registry.dispatch(4, PinEventTypes::Falling);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let registry = SubscriberRegistry::new();
        let (hits, good) = counter();
        registry.subscribe(
            2,
            2,
            PinEventTypes::Both,
            Arc::new(|_event| panic!("subscriber failure")),
        );
        registry.subscribe(2, 2, PinEventTypes::Both, good);

        assert_eq!(registry.dispatch(2, PinEventTypes::Rising), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let registry = Arc::new(SubscriberRegistry::new());
        let slot = Arc::new(parking_lot::Mutex::new(None::<SubscriptionId>));
        let registry_clone = Arc::clone(&registry);
        let slot_clone = Arc::clone(&slot);
        let (id, _) = registry.subscribe(
            5,
            5,
            PinEventTypes::Both,
            Arc::new(move |_event| {
                if let Some(id) = *slot_clone.lock() {
                    registry_clone.unsubscribe(5, id);
                }
            }),
        );
        *slot.lock() = Some(id);

        assert_eq!(registry.dispatch(5, PinEventTypes::Rising), 1);
        assert_eq!(registry.subscriber_count(5), 0);
    }

    #[test]
    fn test_remove_pin() {
        let registry = SubscriberRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();
        registry.subscribe(3, 3, PinEventTypes::Both, a);
        registry.subscribe(3, 3, PinEventTypes::Rising, b);
        assert_eq!(registry.remove_pin(3), 2);
        assert_eq!(registry.remove_pin(3), 0);
    }
}
