//! In-process publish/subscribe hub that decouples the subsystems.
//!
//! - `event`: the [`Event`] value and the closed set of [`EventKind`]s
//!
//! Delivery is synchronous: `publish` runs every callback registered for the
//! event's kind in subscription order, then every wildcard callback. A
//! callback may publish again; nesting is followed up to
//! [`MAX_PUBLISH_DEPTH`] levels, deeper publishes are queued and delivered
//! once the outermost `publish` returns. A queued event therefore reaches
//! subscribers after anything a shallower callback publishes later in the
//! same chain. Callbacks must not block.

mod event;

pub use event::{Event, EventKind};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Nested publishes beyond this depth are queued instead of recursing.
pub const MAX_PUBLISH_DEPTH: usize = 3;

/// Upper bound on queued events drained by one outermost publish.
const MAX_DEFERRED_EVENTS: usize = 64;

type Callback = Rc<RefCell<dyn FnMut(&Event) -> anyhow::Result<()>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    callback: Callback,
}

pub struct EventBus {
    subscribers: RefCell<Vec<Subscriber>>,
    wildcard: RefCell<Vec<Subscriber>>,
    next_id: Cell<u64>,
    depth: Cell<usize>,
    deferred: RefCell<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
            wildcard: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            depth: Cell::new(0),
            deferred: RefCell::new(VecDeque::new()),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        SubscriptionId(id)
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + 'static,
    {
        let id = self.allocate_id();
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            kind: Some(kind),
            callback: Rc::new(RefCell::new(callback)),
        });
        tracing::trace!(id = id.0, kind = ?kind, "Subscribed");
        id
    }

    /// Subscribe to every event regardless of kind.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + 'static,
    {
        let id = self.allocate_id();
        self.wildcard.borrow_mut().push(Subscriber {
            id,
            kind: None,
            callback: Rc::new(RefCell::new(callback)),
        });
        tracing::trace!(id = id.0, "Subscribed to all events");
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        for list in [&self.subscribers, &self.wildcard] {
            let mut list = list.borrow_mut();
            let before = list.len();
            list.retain(|s| s.id != id);
            if list.len() != before {
                return true;
            }
        }
        false
    }

    /// Drop every typed subscription for `kind`. Wildcard subscribers stay.
    pub fn clear(&self, kind: EventKind) {
        self.subscribers.borrow_mut().retain(|s| s.kind != Some(kind));
    }

    pub fn clear_all(&self) {
        self.subscribers.borrow_mut().clear();
        self.wildcard.borrow_mut().clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.kind == Some(kind))
            .count()
    }

    pub fn publish(&self, event: Event) {
        let depth = self.depth.get();
        if depth >= MAX_PUBLISH_DEPTH {
            tracing::debug!(kind = ?event.kind, depth, "Publish depth reached, queueing event");
            self.deferred.borrow_mut().push_back(event);
            return;
        }

        self.depth.set(depth + 1);
        self.dispatch(&event);
        self.depth.set(depth);

        if depth == 0 {
            self.drain_deferred();
        }
    }

    fn drain_deferred(&self) {
        let mut delivered = 0;
        loop {
            let Some(event) = self.deferred.borrow_mut().pop_front() else {
                break;
            };
            if delivered == MAX_DEFERRED_EVENTS {
                let dropped = self.deferred.borrow().len() + 1;
                self.deferred.borrow_mut().clear();
                tracing::warn!(dropped, "Deferred event queue overflow, dropping events");
                break;
            }
            delivered += 1;
            self.depth.set(1);
            self.dispatch(&event);
            self.depth.set(0);
        }
    }

    fn dispatch(&self, event: &Event) {
        // Snapshot so callbacks may subscribe or unsubscribe while we iterate.
        let targets: Vec<(SubscriptionId, Callback)> = {
            let typed = self.subscribers.borrow();
            let wildcard = self.wildcard.borrow();
            typed
                .iter()
                .filter(|s| s.kind == Some(event.kind))
                .chain(wildcard.iter())
                .map(|s| (s.id, s.callback.clone()))
                .collect()
        };

        for (id, callback) in targets {
            if !self.is_registered(id) {
                continue;
            }
            let Ok(mut callback) = callback.try_borrow_mut() else {
                tracing::warn!(id = id.0, kind = ?event.kind, "Subscriber re-entered itself, skipping");
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(id = id.0, kind = ?event.kind, error = %e, "Event callback failed")
                }
                Err(_) => {
                    tracing::error!(id = id.0, kind = ?event.kind, "Event callback panicked")
                }
            }
        }
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.subscribers.borrow().iter().any(|s| s.id == id)
            || self.wildcard.borrow().iter().any(|s| s.id == id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnMut(&Event) -> anyhow::Result<()>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_for_factory = log.clone();
        let factory = move |name: &str| {
            let log = log_for_factory.clone();
            let name = name.to_string();
            Box::new(move |e: &Event| {
                log.borrow_mut().push(format!("{name}:{:?}", e.kind));
                Ok(())
            }) as Box<dyn FnMut(&Event) -> anyhow::Result<()>>
        };
        (log, factory)
    }

    #[test]
    fn typed_subscribers_run_in_order_then_wildcards() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        bus.subscribe_all(make("all"));
        bus.subscribe(EventKind::TrackChanged, make("first"));
        bus.subscribe(EventKind::TrackChanged, make("second"));
        bus.subscribe(EventKind::PlaybackChanged, make("other"));

        bus.publish(Event::new(EventKind::TrackChanged));

        assert_eq!(
            *log.borrow(),
            vec!["first:TrackChanged", "second:TrackChanged", "all:TrackChanged"]
        );
    }

    #[test]
    fn each_callback_runs_exactly_once_per_publish() {
        let bus = EventBus::new();
        let count = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(EventKind::UiRefresh, move |_| {
                count.set(count.get() + 1);
                Ok(())
            });
        }

        bus.publish(Event::new(EventKind::UiRefresh));
        bus.publish(Event::new(EventKind::UiRefresh));

        assert_eq!(count.get(), 6);
    }

    #[test]
    fn unsubscribed_callbacks_are_not_invoked() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let a = bus.subscribe(EventKind::UiRefresh, make("a"));
        bus.subscribe(EventKind::UiRefresh, make("b"));
        let all = bus.subscribe_all(make("all"));

        assert!(bus.unsubscribe(a));
        assert!(bus.unsubscribe(all));
        assert!(!bus.unsubscribe(a));

        bus.publish(Event::new(EventKind::UiRefresh));
        assert_eq!(*log.borrow(), vec!["b:UiRefresh"]);
    }

    #[test]
    fn subscription_ids_increase() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventKind::UiRefresh, |_| Ok(()));
        let b = bus.subscribe_all(|_| Ok(()));
        let c = bus.subscribe(EventKind::StateChanged, |_| Ok(()));
        assert!(a < b && b < c);
    }

    #[test]
    fn failing_subscriber_does_not_stop_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(EventKind::UiRefresh, |_| Err(anyhow::anyhow!("boom")));
        bus.subscribe(EventKind::UiRefresh, |_| panic!("subscriber bug"));
        bus.subscribe(EventKind::UiRefresh, make("survivor"));

        bus.publish(Event::new(EventKind::UiRefresh));

        assert_eq!(*log.borrow(), vec!["survivor:UiRefresh"]);
    }

    #[test]
    fn clear_removes_only_that_kind() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::UiRefresh, |_| Ok(()));
        bus.subscribe(EventKind::UiRefresh, |_| Ok(()));
        bus.subscribe(EventKind::StateChanged, |_| Ok(()));

        bus.clear(EventKind::UiRefresh);
        assert_eq!(bus.subscriber_count(EventKind::UiRefresh), 0);
        assert_eq!(bus.subscriber_count(EventKind::StateChanged), 1);

        bus.clear_all();
        assert_eq!(bus.subscriber_count(EventKind::StateChanged), 0);
    }

    #[test]
    fn nested_publish_is_delivered_in_order() {
        let bus = Rc::new(EventBus::new());
        let (log, make) = recorder();

        let inner = bus.clone();
        bus.subscribe(EventKind::AuthCompleted, move |_| {
            inner.publish(Event::new(EventKind::StateChanged));
            Ok(())
        });
        bus.subscribe(EventKind::StateChanged, make("state"));
        bus.subscribe(EventKind::AuthCompleted, make("auth"));

        bus.publish(Event::new(EventKind::AuthCompleted));

        assert_eq!(*log.borrow(), vec!["state:StateChanged", "auth:AuthCompleted"]);
    }

    #[test]
    fn events_past_the_depth_limit_arrive_after_the_chain() {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let chain = [
            (EventKind::AuthStarted, Some(EventKind::AuthCompleted)),
            (EventKind::AuthCompleted, Some(EventKind::StateChanged)),
            (EventKind::StateChanged, Some(EventKind::UiRefresh)),
            (EventKind::UiRefresh, None),
            (EventKind::TrackChanged, None),
        ];
        for (kind, next) in chain {
            let inner = bus.clone();
            let log = log.clone();
            bus.subscribe(kind, move |_| {
                log.borrow_mut().push(kind);
                if let Some(next) = next {
                    inner.publish(Event::new(next));
                }
                if kind == EventKind::AuthStarted {
                    inner.publish(Event::new(EventKind::TrackChanged));
                }
                Ok(())
            });
        }

        bus.publish(Event::new(EventKind::AuthStarted));

        assert_eq!(
            *log.borrow(),
            vec![
                EventKind::AuthStarted,
                EventKind::AuthCompleted,
                EventKind::StateChanged,
                EventKind::TrackChanged,
                EventKind::UiRefresh,
            ]
        );
    }

    #[test]
    fn publish_loops_are_bounded() {
        let bus = Rc::new(EventBus::new());
        let hits = Rc::new(Cell::new(0));

        let ping_bus = bus.clone();
        let ping_hits = hits.clone();
        bus.subscribe(EventKind::UiRefresh, move |_| {
            ping_hits.set(ping_hits.get() + 1);
            ping_bus.publish(Event::new(EventKind::ConfigLoaded));
            Ok(())
        });
        let pong_bus = bus.clone();
        bus.subscribe(EventKind::ConfigLoaded, move |_| {
            pong_bus.publish(Event::new(EventKind::UiRefresh));
            Ok(())
        });

        bus.publish(Event::new(EventKind::UiRefresh));

        assert!(hits.get() > 1);
        assert!(hits.get() <= 2 * (MAX_DEFERRED_EVENTS + 1));
    }
}
