//! Typed publish/subscribe bus.
//!
//! Lets the request pipeline report an unrecoverable authorization failure
//! without depending on session teardown or on the UI. A bus is an explicit
//! handle owned by the application; clones share the same registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Something outside the HTTP pipeline wants the session torn down
    Unauthorized,
    /// A forced logout happened; carries the alert to show the user
    SessionExpiredAlert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Unauthorized,
    SessionExpiredAlert(Alert),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Unauthorized => EventKind::Unauthorized,
            Event::SessionExpiredAlert(_) => EventKind::SessionExpiredAlert,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
    Success,
}

/// Notification payload rendered by the view layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn session_expired() -> Self {
        Self {
            kind: AlertKind::Error,
            title: "Session expired".to_string(),
            message: "Your session has expired. Please sign in again.".to_string(),
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

/// Non-owning bus handle for handlers that need to publish follow-up events
#[derive(Clone)]
pub struct WeakEventBus {
    registry: Weak<Mutex<Registry>>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.registry.upgrade().map(|registry| EventBus { registry })
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed to `kind`
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(handlers) = registry.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Invoke every handler subscribed to the event's kind, in subscription
    /// order, and return how many ran.
    ///
    /// Handlers run on a snapshot taken before the first call, with the
    /// registry unlocked, so they may subscribe, unsubscribe or publish.
    pub fn publish(&self, event: Event) -> usize {
        let snapshot: Vec<Handler> = self
            .registry()
            .handlers
            .get(&event.kind())
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        tracing::debug!(kind = ?event.kind(), handlers = snapshot.len(), "Publishing event");
        for handler in &snapshot {
            handler(&event);
        }
        snapshot.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry().handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let counts: HashMap<EventKind, usize> = registry
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_make = Arc::clone(&log);
        let make = move |name: &str| -> Box<dyn Fn(&Event) + Send + Sync> {
            let log = Arc::clone(&log_for_make);
            let name = name.to_string();
            Box::new(move |_event: &Event| log.lock().unwrap().push(name.clone()))
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(EventKind::Unauthorized, make("first"));
        bus.subscribe(EventKind::Unauthorized, make("second"));
        bus.subscribe(EventKind::SessionExpiredAlert, make("other-kind"));

        assert_eq!(bus.publish(Event::Unauthorized), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let first = bus.subscribe(EventKind::Unauthorized, make("first"));
        bus.subscribe(EventKind::Unauthorized, make("second"));

        assert!(bus.unsubscribe(EventKind::Unauthorized, first));
        assert!(!bus.unsubscribe(EventKind::Unauthorized, first));
        assert!(!bus.unsubscribe(EventKind::SessionExpiredAlert, first));

        bus.publish(Event::Unauthorized);
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_subscription_added_during_dispatch_waits_for_next_publish() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let weak = bus.downgrade();
        let late = Mutex::new(Some(make("late")));
        bus.subscribe(EventKind::Unauthorized, move |_| {
            if let (Some(bus), Some(handler)) = (weak.upgrade(), late.lock().unwrap().take()) {
                bus.subscribe(EventKind::Unauthorized, handler);
            }
        });

        assert_eq!(bus.publish(Event::Unauthorized), 1);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(bus.publish(Event::Unauthorized), 2);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_removal_during_dispatch_does_not_skip_snapshot() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let weak = bus.downgrade();
        let target = Arc::new(Mutex::new(None::<SubscriptionId>));
        let target_in_handler = Arc::clone(&target);
        bus.subscribe(EventKind::Unauthorized, move |_| {
            let id = *target_in_handler.lock().unwrap();
            if let (Some(bus), Some(id)) = (weak.upgrade(), id) {
                bus.unsubscribe(EventKind::Unauthorized, id);
            }
        });
        let second = bus.subscribe(EventKind::Unauthorized, make("second"));
        *target.lock().unwrap() = Some(second);

        bus.publish(Event::Unauthorized);
        assert_eq!(*log.lock().unwrap(), vec!["second"]);

        bus.publish(Event::Unauthorized);
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
        assert_eq!(bus.handler_count(EventKind::Unauthorized), 1);
    }

    #[test]
    fn test_alert_payload_shape() {
        let alert = serde_json::to_value(Alert::session_expired()).unwrap();
        assert_eq!(alert["type"], "error");
        assert_eq!(alert["title"], "Session expired");
    }
}
