//! Dispatch registry
//!
//! Bindings are kept in registration order, which is also delivery order.
//! The first dispatch to a concrete address memoizes the list of bindings
//! that matched it. The memo is only cleared, in full, by
//! [`Dispatcher::remove_handler`]; a binding added later will not see an
//! address whose entry is already cached until some removal happens.
//!
//! All registry access and all deliveries happen under one reentrant lock,
//! so a handler (or a nested bundle) may call back into the dispatcher from
//! the delivering thread.
//!
//! # Example
//!
//! ```
//! use osclink_core::{Bundle, Message};
//! use osclink_router::Dispatcher;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::default();
//! let hits = Arc::new(AtomicUsize::new(0));
//! let counter = hits.clone();
//! dispatcher.add_handler("/mixer/*/gain", move |_msg| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! dispatcher.dispatch_message(&Message::new("/mixer/3/gain")).unwrap();
//! dispatcher
//!     .dispatch_bundle(Bundle::immediate(vec![Message::new("/mixer/4/gain").into()]))
//!     .unwrap();
//! assert_eq!(hits.load(Ordering::SeqCst), 2);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use osclink_core::{AcceptAny, Bundle, Message, Packet, Pattern, Validator};
use parking_lot::ReentrantMutex;
use tracing::{debug, error, trace, warn};

use crate::binding::{invoke, Binding, BindingId, Callback, Handler};
use crate::config::{RouterConfig, ValidationPolicy};
use crate::error::{DeliveryFailure, Result, RouterError};
use crate::scheduler::{decide, Decision, Scheduler};

type Matched = Arc<[Arc<Binding>]>;

#[derive(Default)]
struct Registry {
    bindings: Vec<(BindingId, Arc<Binding>)>,
    next_id: u64,
    cache: HashMap<String, Matched>,
    fallback: Option<Arc<dyn Handler>>,
}

impl Registry {
    fn resolve(&mut self, address: &str) -> Matched {
        if let Some(hit) = self.cache.get(address) {
            return hit.clone();
        }
        let matched: Matched = self
            .bindings
            .iter()
            .filter(|(_, binding)| binding.matches(address))
            .map(|(_, binding)| binding.clone())
            .collect();
        self.cache.insert(address.to_string(), matched.clone());
        matched
    }
}

/// Failures collected while processing one dispatch
#[derive(Default)]
struct Outcome {
    failures: Vec<DeliveryFailure>,
    too_deep: bool,
}

struct Inner {
    config: RouterConfig,
    registry: ReentrantMutex<RefCell<Registry>>,
    scheduler: Scheduler,
}

/// Pattern-matching message dispatcher.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: RouterConfig) -> Self {
        let scheduler = Scheduler::new(config.scheduler.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry: ReentrantMutex::new(RefCell::new(Registry::default())),
                scheduler,
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a callback that accepts any message on `pattern`
    pub fn add_handler<F>(&self, pattern: &str, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.add_handler_with(pattern, AcceptAny, callback);
    }

    /// Register a callback fed by `validator`
    pub fn add_handler_with<V, F>(&self, pattern: &str, validator: V, callback: F)
    where
        V: Validator,
        F: Fn(V::Output) + Send + Sync + 'static,
    {
        self.add_binding(pattern, Arc::new(Callback::new(validator, callback)));
    }

    /// Register any [`Handler`]. Existing cache entries are left untouched.
    pub fn add_binding(&self, pattern: &str, handler: Arc<dyn Handler>) -> BindingId {
        let id = self.push(Binding::new(Pattern::compile(pattern), handler));
        debug!("added handler for {}", pattern);
        id
    }

    /// Register a handler that sees matching messages without claiming
    /// them. See [`Binding::observer`].
    ///
    /// Observers are not affected by [`Dispatcher::remove_handler`]; they
    /// leave only through [`Dispatcher::remove_binding`].
    pub fn add_observer(&self, pattern: &str, handler: Arc<dyn Handler>) -> BindingId {
        let id = self.push(Binding::observer(Pattern::compile(pattern), handler));
        debug!("added observer for {}", pattern);
        id
    }

    fn push(&self, binding: Binding) -> BindingId {
        let guard = self.inner.registry.lock();
        let mut registry = guard.borrow_mut();
        let id = BindingId(registry.next_id);
        registry.next_id += 1;
        registry.bindings.push((id, Arc::new(binding)));
        id
    }

    /// Remove every non-observer binding registered with exactly `pattern`
    /// and clear the whole dispatch cache. Returns how many bindings were
    /// removed.
    pub fn remove_handler(&self, pattern: &str) -> Result<usize> {
        let guard = self.inner.registry.lock();
        let mut registry = guard.borrow_mut();
        let before = registry.bindings.len();
        registry
            .bindings
            .retain(|(_, binding)| {
                binding.is_observer() || binding.pattern().as_str() != pattern
            });
        let removed = before - registry.bindings.len();
        registry.cache.clear();

        if removed == 0 {
            return Err(RouterError::NoHandler(pattern.to_string()));
        }
        debug!("removed {} handler(s) for {}", removed, pattern);
        Ok(removed)
    }

    /// Remove one registration and clear the whole dispatch cache. Returns
    /// false if `id` was already gone.
    pub fn remove_binding(&self, id: BindingId) -> bool {
        let guard = self.inner.registry.lock();
        let mut registry = guard.borrow_mut();
        let before = registry.bindings.len();
        registry.bindings.retain(|(existing, _)| *existing != id);
        registry.cache.clear();
        registry.bindings.len() < before
    }

    /// Callback for messages that no binding other than an observer matches
    pub fn set_default_handler<F>(&self, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let guard = self.inner.registry.lock();
        guard.borrow_mut().fallback = Some(Arc::new(Callback::new(AcceptAny, callback)));
    }

    pub fn clear_default_handler(&self) {
        let guard = self.inner.registry.lock();
        guard.borrow_mut().fallback = None;
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn handler_count(&self) -> usize {
        let guard = self.inner.registry.lock();
        let count = guard.borrow().bindings.len();
        count
    }

    pub fn cache_len(&self) -> usize {
        let guard = self.inner.registry.lock();
        let len = guard.borrow().cache.len();
        len
    }

    pub fn is_cached(&self, address: &str) -> bool {
        let guard = self.inner.registry.lock();
        let cached = guard.borrow().cache.contains_key(address);
        cached
    }

    /// Number of deferred bundles waiting for their timetag
    pub fn scheduled_len(&self) -> usize {
        self.inner.scheduler.len()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch a decoded packet
    pub fn dispatch(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Message(message) => self.dispatch_message(&message),
            Packet::Bundle(bundle) => self.dispatch_bundle(bundle),
        }
    }

    /// Deliver a message to every matching binding, in registration order
    pub fn dispatch_message(&self, message: &Message) -> Result<()> {
        let mut outcome = Outcome::default();
        self.inner.deliver(message, &mut outcome);
        self.inner.settle(outcome)
    }

    /// Run a bundle now if its timetag is due, otherwise schedule it
    pub fn dispatch_bundle(&self, bundle: Bundle) -> Result<()> {
        let mut outcome = Outcome::default();
        self.inner.route_bundle(bundle, 0, &mut outcome);
        self.inner.settle(outcome)
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    /// Start the bundle scheduler worker. Redundant calls are no-ops.
    pub fn start_scheduler(&self) -> Result<()> {
        self.inner.start_worker()
    }

    /// Stop the bundle scheduler worker. Redundant calls are no-ops.
    pub fn stop_scheduler(&self) {
        self.inner.scheduler.stop();
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.inner.scheduler.is_running()
    }
}

impl Inner {
    fn deliver(&self, message: &Message, outcome: &mut Outcome) {
        let guard = self.registry.lock();
        let (matched, fallback) = {
            let mut registry = guard.borrow_mut();
            (registry.resolve(&message.address), registry.fallback.clone())
        };

        for binding in matched.iter() {
            if let Err(error) = binding.invoke(message) {
                self.record(outcome, message, binding.pattern().as_str(), error);
            }
        }

        if matched.iter().any(|binding| !binding.is_observer()) {
            return;
        }
        match fallback {
            Some(handler) => {
                if let Err(error) = invoke(handler.as_ref(), message) {
                    self.record(outcome, message, "<default>", error);
                }
            }
            None => trace!("no handler for {}", message.address),
        }
    }

    fn record(
        &self,
        outcome: &mut Outcome,
        message: &Message,
        pattern: &str,
        error: crate::error::HandlerError,
    ) {
        let failure = DeliveryFailure {
            address: message.address.clone(),
            pattern: pattern.to_string(),
            error,
        };
        match self.config.validation {
            ValidationPolicy::Log => warn!("dropped delivery to {}", failure),
            ValidationPolicy::Propagate => debug!("delivery failed: {}", failure),
        }
        outcome.failures.push(failure);
    }

    fn route_bundle(self: &Arc<Self>, bundle: Bundle, depth: usize, outcome: &mut Outcome) {
        match decide(bundle.timetag, SystemTime::now()) {
            Decision::Ready => self.run_bundle(bundle, depth, outcome),
            Decision::Deferred(due) => self.defer(due, bundle),
        }
    }

    /// Deliver a due bundle depth-first. Nested bundles are decided again.
    fn run_bundle(self: &Arc<Self>, bundle: Bundle, depth: usize, outcome: &mut Outcome) {
        if depth > self.config.max_bundle_depth {
            warn!(
                "dropping bundle nested {} levels deep (max {})",
                depth, self.config.max_bundle_depth
            );
            outcome.too_deep = true;
            return;
        }

        let _guard = self.registry.lock();
        for element in bundle.elements {
            match element {
                Packet::Message(message) => self.deliver(&message, outcome),
                Packet::Bundle(inner) => self.route_bundle(inner, depth + 1, outcome),
            }
        }
    }

    fn defer(self: &Arc<Self>, due: SystemTime, bundle: Bundle) {
        self.scheduler.push(due, bundle);
        if let Err(e) = self.start_worker() {
            error!("failed to start bundle scheduler: {}", e);
        }
    }

    fn start_worker(self: &Arc<Self>) -> Result<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.scheduler
            .start(move |bundle| match weak.upgrade() {
                Some(inner) => {
                    let mut outcome = Outcome::default();
                    inner.run_bundle(bundle, 0, &mut outcome);
                    if !outcome.failures.is_empty() {
                        debug!(
                            "scheduled bundle finished with {} failed deliveries",
                            outcome.failures.len()
                        );
                    }
                    true
                }
                None => false,
            })
            .map(|_| ())
            .map_err(|e| RouterError::Scheduler(e.to_string()))
    }

    fn settle(&self, outcome: Outcome) -> Result<()> {
        if self.config.validation == ValidationPolicy::Log {
            return Ok(());
        }
        if outcome.too_deep {
            return Err(RouterError::BundleTooDeep {
                max: self.config.max_bundle_depth,
            });
        }
        if outcome.failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Delivery(outcome.failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(dispatcher: &Dispatcher, pattern: &str) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.add_handler(pattern, move |m| sink.lock().push(m.address));
        seen
    }

    #[test]
    fn test_add_handler() {
        let dispatcher = Dispatcher::default();
        dispatcher.add_handler("/test", |_| {});
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[test]
    fn test_cache_populated_on_dispatch() {
        let dispatcher = Dispatcher::default();
        let seen = recorder(&dispatcher, "/test");

        dispatcher.dispatch_message(&Message::new("/test")).unwrap();
        assert!(dispatcher.is_cached("/test"));

        dispatcher.dispatch_message(&Message::new("/test")).unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_remove_clears_cache() {
        let dispatcher = Dispatcher::default();
        recorder(&dispatcher, "/test");
        recorder(&dispatcher, "/other");
        dispatcher.dispatch_message(&Message::new("/test")).unwrap();
        dispatcher.dispatch_message(&Message::new("/other")).unwrap();
        assert_eq!(dispatcher.cache_len(), 2);

        assert_eq!(dispatcher.remove_handler("/other").unwrap(), 1);
        assert_eq!(dispatcher.cache_len(), 0);
    }

    #[test]
    fn test_remove_unknown_pattern() {
        let dispatcher = Dispatcher::default();
        recorder(&dispatcher, "/test");
        dispatcher.dispatch_message(&Message::new("/test")).unwrap();

        let err = dispatcher.remove_handler("/missing").unwrap_err();
        assert!(matches!(err, RouterError::NoHandler(p) if p == "/missing"));
        assert_eq!(dispatcher.cache_len(), 0);
    }

    #[test]
    fn test_handler_may_reenter_dispatcher() {
        let dispatcher = Dispatcher::default();
        let seen = recorder(&dispatcher, "/echo/out");
        let handle = dispatcher.clone();
        dispatcher.add_handler("/echo/in", move |_| {
            handle.add_handler("/late", |_| {});
            handle.dispatch_message(&Message::new("/echo/out")).unwrap();
        });

        dispatcher.dispatch_message(&Message::new("/echo/in")).unwrap();
        assert_eq!(*seen.lock(), vec!["/echo/out".to_string()]);
        assert_eq!(dispatcher.handler_count(), 3);
    }

    #[test]
    fn test_observer_does_not_claim_messages() {
        let dispatcher = Dispatcher::default();
        let observed = Arc::new(Mutex::new(0usize));
        let counter = observed.clone();
        dispatcher.add_observer(
            "*",
            Arc::new(Callback::new(AcceptAny, move |_m: Message| {
                *counter.lock() += 1
            })),
        );
        let fallback = Arc::new(Mutex::new(Vec::new()));
        let sink = fallback.clone();
        dispatcher.set_default_handler(move |m| sink.lock().push(m.address));
        let claimed = recorder(&dispatcher, "/claimed");

        dispatcher.dispatch_message(&Message::new("/claimed")).unwrap();
        dispatcher.dispatch_message(&Message::new("/free")).unwrap();

        assert_eq!(*observed.lock(), 2);
        assert_eq!(claimed.lock().len(), 1);
        assert_eq!(*fallback.lock(), vec!["/free".to_string()]);
    }

    #[test]
    fn test_observer_removed_by_id_only() {
        let dispatcher = Dispatcher::default();
        let observed = Arc::new(Mutex::new(0usize));
        let counter = observed.clone();
        let id = dispatcher.add_observer(
            "/shared",
            Arc::new(Callback::new(AcceptAny, move |_m: Message| {
                *counter.lock() += 1
            })),
        );
        recorder(&dispatcher, "/shared");

        assert_eq!(dispatcher.remove_handler("/shared").unwrap(), 1);
        dispatcher.dispatch_message(&Message::new("/shared")).unwrap();
        assert_eq!(*observed.lock(), 1);

        assert!(dispatcher.remove_binding(id));
        assert!(!dispatcher.remove_binding(id));
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(matches!(
            dispatcher.remove_handler("/shared"),
            Err(RouterError::NoHandler(_))
        ));
    }

    #[test]
    fn test_depth_guard() {
        let config = RouterConfig {
            max_bundle_depth: 2,
            ..RouterConfig::propagating()
        };
        let dispatcher = Dispatcher::new(config);
        let seen = recorder(&dispatcher, "/deep");

        let mut bundle = Bundle::immediate(vec![Message::new("/deep").into()]);
        for _ in 0..3 {
            bundle = Bundle::immediate(vec![bundle.into()]);
        }

        let err = dispatcher.dispatch_bundle(bundle).unwrap_err();
        assert!(matches!(err, RouterError::BundleTooDeep { max: 2 }));
        assert!(seen.lock().is_empty());
    }
}
