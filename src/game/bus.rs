//! Event Bus
//!
//! Named publish/subscribe dispatch. Each match gets its own namespaced view
//! of a bus so handlers registered for one match never see another match's
//! events, without any process-wide singleton.
//!
//! Handlers may be synchronous or asynchronous. A failing handler is logged
//! and skipped; it never prevents the remaining handlers from running.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::clock::{system_clock, SharedClock};

/// Error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Payload as delivered to handlers: the data plus its name and emit time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent<T> {
    /// Full (namespaced) event name.
    pub name: String,
    /// Emit time in milliseconds.
    pub timestamp_ms: u64,
    /// Payload.
    pub data: T,
}

type SyncHandler<T> = Arc<dyn Fn(&BusEvent<T>) -> Result<(), HandlerError> + Send + Sync>;
type AsyncHandler<T> =
    Arc<dyn Fn(BusEvent<T>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

enum Handler<T> {
    Sync(SyncHandler<T>),
    Async(AsyncHandler<T>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(h) => Handler::Sync(Arc::clone(h)),
            Handler::Async(h) => Handler::Async(Arc::clone(h)),
        }
    }
}

struct Registry<T> {
    next_id: u64,
    handlers: BTreeMap<String, Vec<(u64, Handler<T>)>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self { next_id: 1, handlers: BTreeMap::new() }
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the subscription.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription<T> {
    registry: Weak<RwLock<Registry<T>>>,
    name: String,
    id: u64,
}

impl<T> Subscription<T> {
    /// Event name this handle is subscribed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut reg = registry.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = reg.handlers.get_mut(&self.name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            reg.handlers.remove(&self.name);
        }
        removed
    }
}

/// Named event dispatcher, generic over the payload type.
pub struct EventBus<T> {
    registry: Arc<RwLock<Registry<T>>>,
    prefix: String,
    clock: SharedClock,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            prefix: self.prefix.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> EventBus<T> {
    /// Bus stamped with the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Bus stamped with the given clock.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::new())),
            prefix: String::new(),
            clock,
        }
    }

    /// Sub-bus sharing this bus's handlers, with every name prefixed by
    /// `prefix:`. Namespaces nest.
    pub fn namespace(&self, prefix: &str) -> EventBus<T> {
        EventBus {
            registry: Arc::clone(&self.registry),
            prefix: format!("{}{}:", self.prefix, prefix),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Prefix applied by this view (empty for the root bus).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn register(&self, name: &str, handler: Handler<T>) -> Subscription<T> {
        let full = self.full_name(name);
        let mut reg = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let id = reg.next_id;
        reg.next_id += 1;
        reg.handlers.entry(full.clone()).or_default().push((id, handler));
        Subscription { registry: Arc::downgrade(&self.registry), name: full, id }
    }

    /// Register a synchronous handler.
    pub fn on<F>(&self, name: &str, handler: F) -> Subscription<T>
    where
        F: Fn(&BusEvent<T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(name, Handler::Sync(Arc::new(handler)))
    }

    /// Register an asynchronous handler.
    pub fn on_async<F>(&self, name: &str, handler: F) -> Subscription<T>
    where
        F: Fn(BusEvent<T>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static,
    {
        self.register(name, Handler::Async(Arc::new(handler)))
    }

    /// Number of handlers registered under `name` in this namespace.
    pub fn listener_count(&self, name: &str) -> usize {
        let reg = self.registry.read().unwrap_or_else(|e| e.into_inner());
        reg.handlers.get(&self.full_name(name)).map(Vec::len).unwrap_or(0)
    }

    fn snapshot(&self, full: &str) -> Vec<Handler<T>> {
        let reg = self.registry.read().unwrap_or_else(|e| e.into_inner());
        reg.handlers
            .get(full)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn enrich(&self, full: String, data: T) -> BusEvent<T> {
        BusEvent { name: full, timestamp_ms: self.clock.now_ms(), data }
    }

    /// Deliver to the handlers subscribed at the time of the call.
    ///
    /// Synchronous handlers run inline. Asynchronous handlers are spawned on
    /// the current Tokio runtime, or dropped with a debug log when there is
    /// none. Returns the number of handlers invoked.
    pub fn emit(&self, name: &str, data: T) -> usize {
        let full = self.full_name(name);
        let handlers = self.snapshot(&full);
        if handlers.is_empty() {
            return 0;
        }
        let event = self.enrich(full, data);

        for handler in &handlers {
            match handler {
                Handler::Sync(h) => {
                    if let Err(e) = h(&event) {
                        warn!(event = %event.name, error = %e, "Event handler failed");
                    }
                }
                Handler::Async(h) => {
                    let fut = h(event.clone());
                    match tokio::runtime::Handle::try_current() {
                        Ok(rt) => {
                            let name = event.name.clone();
                            rt.spawn(async move {
                                if let Err(e) = fut.await {
                                    warn!(event = %name, error = %e, "Async event handler failed");
                                }
                            });
                        }
                        Err(_) => {
                            debug!(event = %event.name, "No runtime for async handler, skipped");
                        }
                    }
                }
            }
        }
        handlers.len()
    }

    /// Deliver and wait for every handler to finish. Returns the errors of
    /// the handlers that failed, after logging them.
    pub async fn emit_async(&self, name: &str, data: T) -> Vec<HandlerError> {
        let full = self.full_name(name);
        let handlers = self.snapshot(&full);
        if handlers.is_empty() {
            return Vec::new();
        }
        let event = self.enrich(full, data);

        let futures = handlers.iter().map(|handler| {
            let event = event.clone();
            let handler = handler.clone();
            async move {
                match handler {
                    Handler::Sync(h) => h(&event),
                    Handler::Async(h) => h(event).await,
                }
            }
        });

        let errors: Vec<HandlerError> = join_all(futures)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for e in &errors {
            warn!(event = %event.name, error = %e, "Event handler failed");
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_emit_enriches_payload() {
        let clock = Arc::new(ManualClock::new(5_000));
        let bus: EventBus<u32> = EventBus::with_clock(clock);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = bus.on("damage", move |e| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });

        assert_eq!(bus.emit("damage", 3), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], BusEvent { name: "damage".into(), timestamp_ms: 5_000, data: 3 });
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let bus: EventBus<()> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _a = bus.on("x", |_| Err("boom".into()));
        let c = Arc::clone(&count);
        let _b = bus.on("x", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.emit("x", ()), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus: EventBus<()> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = bus.on("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit("tick", ());
        assert!(sub.unsubscribe());
        bus.emit("tick", ());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("tick"), 0);
    }

    #[test]
    fn test_handler_added_during_emit_waits_for_next_emit() {
        let bus: EventBus<()> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_bus = bus.clone();
        let c = Arc::clone(&count);
        let _sub = bus.on("grow", move |_| {
            let c = Arc::clone(&c);
            let _late = inner_bus.on("grow", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        assert_eq!(bus.emit("grow", ()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let bus: EventBus<&'static str> = EventBus::new();
        let match_a = bus.namespace("match-a");
        let match_b = bus.namespace("match-b");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = match_a.on("death", move |e| {
            sink.lock().unwrap().push(e.name.clone());
            Ok(())
        });

        assert_eq!(match_b.emit("death", "b"), 0);
        assert_eq!(match_a.emit("death", "a"), 1);
        assert_eq!(bus.listener_count("match-a:death"), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["match-a:death".to_string()]);
        assert_eq!(match_a.namespace("sub").prefix(), "match-a:sub:");
    }

    #[tokio::test]
    async fn test_emit_async_awaits_all_handlers() {
        let bus: EventBus<u32> = EventBus::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&total);
        let _a = bus.on_async("heal", move |e| {
            let t = Arc::clone(&t);
            async move {
                tokio::task::yield_now().await;
                t.fetch_add(e.data as usize, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        let _b = bus.on_async("heal", |_| async { Err(HandlerError::from("nope")) }.boxed());
        let t = Arc::clone(&total);
        let _c = bus.on("heal", move |e| {
            t.fetch_add(e.data as usize, Ordering::SeqCst);
            Ok(())
        });

        let errors = bus.emit_async("heal", 2).await;
        assert_eq!(errors, vec![HandlerError::from("nope")]);
        assert_eq!(total.load(Ordering::SeqCst), 4);
    }
}
