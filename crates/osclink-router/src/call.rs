//! Request/response correlation
//!
//! [`CallCorrelator::call`] sends a message and blocks until a reply that
//! passes validation arrives on the reply address, or until the timeout
//! elapses. Replies are picked up by one catch-all observer binding that
//! the correlator registers on the dispatcher when it is created.
//!
//! Only one call may wait on a given reply address; a second call on the
//! same address replaces the first, which then runs into its timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use osclink_core::{AcceptAny, Message, ValidationError, Validator};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::binding::{BindingId, Handler};
use crate::dispatcher::Dispatcher;
use crate::error::Result;

/// Pattern of the binding the correlator listens on
pub const CATCH_ALL: &str = "*";

/// Default time to wait for a reply
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound boundary: hands a message to the encoder/transport
pub trait MessageSender: Send + Sync {
    fn send_message(&self, message: &Message) -> Result<()>;
}

impl<F> MessageSender for F
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn send_message(&self, message: &Message) -> Result<()> {
        self(message)
    }
}

/// Per-call options
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Address the reply arrives on; defaults to the request's own address
    pub reply_address: Option<String>,
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            reply_address: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl CallOptions {
    pub fn reply_address(mut self, address: impl Into<String>) -> Self {
        self.reply_address = Some(address.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Single-assignment handoff between the delivering thread and the caller
struct Slot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, value: T) {
        *self.value.lock() = Some(value);
        self.ready.notify_one();
    }

    /// Wait for the value; `None` as deadline waits without a bound
    fn wait_until(&self, deadline: Option<Instant>) -> Option<T> {
        let mut value = self.value.lock();
        while value.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut value, deadline).timed_out() {
                        break;
                    }
                }
                None => self.ready.wait(&mut value),
            }
        }
        value.take()
    }

    fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

/// Type-erased pending call
trait Waiter: Send + Sync {
    fn id(&self) -> u64;

    /// Validate a reply; on success return the step that completes the call
    fn prepare(&self, message: &Message) -> std::result::Result<Completion, ValidationError>;
}

type Completion = Box<dyn FnOnce() + Send>;

struct Pending<V: Validator> {
    id: u64,
    validator: V,
    slot: Arc<Slot<V::Output>>,
}

impl<V: Validator> Waiter for Pending<V> {
    fn id(&self) -> u64 {
        self.id
    }

    fn prepare(&self, message: &Message) -> std::result::Result<Completion, ValidationError> {
        let value = self.validator.validate(message)?;
        let slot = self.slot.clone();
        Ok(Box::new(move || slot.fill(value)))
    }
}

type PendingTable = Arc<Mutex<HashMap<String, Arc<dyn Waiter>>>>;

/// The binding registered on the dispatcher
struct ReplyHandler {
    pending: PendingTable,
}

impl ReplyHandler {
    fn offer(&self, message: &Message) {
        let waiter = match self.pending.lock().get(&message.address) {
            Some(waiter) => waiter.clone(),
            None => return,
        };

        let complete = match waiter.prepare(message) {
            Ok(complete) => complete,
            Err(e) => {
                warn!("ignoring reply on {}: {}", message.address, e);
                return;
            }
        };

        let mut pending = self.pending.lock();
        match pending.get(&message.address) {
            Some(current) if current.id() == waiter.id() => {
                pending.remove(&message.address);
                complete();
            }
            _ => debug!("reply on {} arrived after its call ended", message.address),
        }
    }
}

impl Handler for ReplyHandler {
    fn handle(&self, message: &Message) -> std::result::Result<(), ValidationError> {
        // rejected replies are dropped here, never reported to the dispatcher
        self.offer(message);
        Ok(())
    }
}

/// Blocking request/response on top of a [`Dispatcher`].
///
/// Dropping the correlator removes its observer from the dispatcher.
pub struct CallCorrelator {
    pending: PendingTable,
    reply_handler: Arc<ReplyHandler>,
    dispatcher: Dispatcher,
    binding: BindingId,
    sender: Arc<dyn MessageSender>,
    next_id: AtomicU64,
}

impl CallCorrelator {
    /// Create a correlator and register its catch-all observer.
    ///
    /// Addresses that already have a cache entry in `dispatcher` will not
    /// reach the correlator until the cache is cleared by a removal, so create
    /// it before traffic starts flowing. The observer is out of reach of
    /// [`Dispatcher::remove_handler`], so removing `"*"` leaves it in place.
    pub fn new(dispatcher: &Dispatcher, sender: Arc<dyn MessageSender>) -> Self {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let reply_handler = Arc::new(ReplyHandler {
            pending: pending.clone(),
        });
        let binding = dispatcher.add_observer(CATCH_ALL, reply_handler.clone());

        Self {
            pending,
            reply_handler,
            dispatcher: dispatcher.clone(),
            binding,
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send `message` and wait for any reply
    pub fn call(&self, message: &Message, options: CallOptions) -> Result<Option<Message>> {
        self.call_with(message, AcceptAny, options)
    }

    /// Send `message` and wait for a reply accepted by `validator`.
    ///
    /// Returns `Ok(None)` on timeout. Send failures are returned as errors.
    /// A timeout too large to represent as a deadline waits without bound.
    pub fn call_with<V: Validator>(
        &self,
        message: &Message,
        validator: V,
        options: CallOptions,
    ) -> Result<Option<V::Output>> {
        let reply_address = options
            .reply_address
            .unwrap_or_else(|| message.address.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new());
        let waiter: Arc<dyn Waiter> = Arc::new(Pending {
            id,
            validator,
            slot: slot.clone(),
        });

        if self
            .pending
            .lock()
            .insert(reply_address.clone(), waiter)
            .is_some()
        {
            debug!("call on {} replaces a pending call", reply_address);
        }

        if let Err(e) = self.sender.send_message(message) {
            self.withdraw(&reply_address, id);
            return Err(e);
        }

        let deadline = Instant::now().checked_add(options.timeout);
        if let Some(value) = slot.wait_until(deadline) {
            return Ok(Some(value));
        }

        // a reply completes under the table lock, so once the entry is gone
        // the slot holds whatever was delivered
        self.withdraw(&reply_address, id);
        let late = slot.take();
        if late.is_none() {
            debug!("call on {} timed out after {:?}", reply_address, options.timeout);
        }
        Ok(late)
    }

    /// Feed a reply directly, bypassing the dispatcher
    pub fn handle_reply(&self, message: &Message) {
        self.reply_handler.offer(message);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, address: &str) -> bool {
        self.pending.lock().contains_key(address)
    }

    fn withdraw(&self, address: &str, id: u64) {
        let mut pending = self.pending.lock();
        if pending.get(address).map_or(false, |w| w.id() == id) {
            pending.remove(address);
        }
    }
}

impl Drop for CallCorrelator {
    fn drop(&mut self) {
        if self.dispatcher.remove_binding(self.binding) {
            debug!("call correlator detached from dispatcher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;

    fn silent() -> Arc<dyn MessageSender> {
        Arc::new(|_: &Message| -> Result<()> { Ok(()) })
    }

    #[test]
    fn test_slot_handoff() {
        let slot = Arc::new(Slot::new());
        let filler = slot.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            filler.fill(7);
        });
        assert_eq!(slot.wait_until(Some(Instant::now() + Duration::from_secs(2))), Some(7));
    }

    #[test]
    fn test_slot_times_out() {
        let slot: Slot<i32> = Slot::new();
        let start = Instant::now();
        assert_eq!(slot.wait_until(Some(start + Duration::from_millis(30))), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_registers_catch_all() {
        let dispatcher = Dispatcher::default();
        let _correlator = CallCorrelator::new(&dispatcher, silent());
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[test]
    fn test_unbounded_slot_waits_for_fill() {
        let slot = Arc::new(Slot::new());
        let filler = slot.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            filler.fill("late");
        });
        assert_eq!(slot.wait_until(None), Some("late"));
    }

    #[test]
    fn test_drop_detaches_from_dispatcher() {
        let dispatcher = Dispatcher::default();
        dispatcher.add_handler("/keep", |_| {});
        for _ in 0..5 {
            let _correlator = CallCorrelator::new(&dispatcher, silent());
            assert_eq!(dispatcher.handler_count(), 2);
        }
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[test]
    fn test_reply_without_pending_call_is_ignored() {
        let dispatcher = Dispatcher::default();
        let correlator = CallCorrelator::new(&dispatcher, silent());
        correlator.handle_reply(&Message::new("/nobody/waits"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_send_failure_withdraws_call() {
        let dispatcher = Dispatcher::default();
        let failing: Arc<dyn MessageSender> = Arc::new(|_: &Message| -> Result<()> {
            Err(RouterError::Send("link down".to_string()))
        });
        let correlator = CallCorrelator::new(&dispatcher, failing);

        let err = correlator
            .call(&Message::new("/req"), CallOptions::default())
            .unwrap_err();
        assert!(matches!(err, RouterError::Send(_)));
        assert!(!correlator.is_pending("/req"));
    }
}
