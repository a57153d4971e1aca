//! Handler bindings

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use osclink_core::{Message, Pattern, ValidationError, Validator};

use crate::error::HandlerError;

/// Something that consumes dispatched messages
pub trait Handler: Send + Sync {
    /// Validate and consume one message
    fn handle(&self, message: &Message) -> Result<(), ValidationError>;
}

/// A callback paired with the validator that feeds it
pub struct Callback<V, F> {
    validator: V,
    callback: F,
}

impl<V, F> Callback<V, F>
where
    V: Validator,
    F: Fn(V::Output) + Send + Sync + 'static,
{
    pub fn new(validator: V, callback: F) -> Self {
        Self {
            validator,
            callback,
        }
    }
}

impl<V, F> Handler for Callback<V, F>
where
    V: Validator,
    F: Fn(V::Output) + Send + Sync + 'static,
{
    fn handle(&self, message: &Message) -> Result<(), ValidationError> {
        let value = self.validator.validate(message)?;
        (self.callback)(value);
        Ok(())
    }
}

/// Identity of one registration, returned by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub(crate) u64);

/// A registered (pattern, handler) pair
pub struct Binding {
    pattern: Pattern,
    handler: Arc<dyn Handler>,
    observer: bool,
}

impl Binding {
    pub fn new(pattern: Pattern, handler: Arc<dyn Handler>) -> Self {
        Self {
            pattern,
            handler,
            observer: false,
        }
    }

    /// A binding that receives messages without claiming them, so the
    /// default handler still runs when only observers match
    pub fn observer(pattern: Pattern, handler: Arc<dyn Handler>) -> Self {
        Self {
            pattern,
            handler,
            observer: true,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn is_observer(&self) -> bool {
        self.observer
    }

    pub fn matches(&self, address: &str) -> bool {
        self.pattern.matches(address)
    }

    /// Run the handler, turning a panic into an error
    pub(crate) fn invoke(&self, message: &Message) -> Result<(), HandlerError> {
        invoke(self.handler.as_ref(), message)
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("pattern", &self.pattern.as_str())
            .field("observer", &self.observer)
            .finish()
    }
}

pub(crate) fn invoke(handler: &dyn Handler, message: &Message) -> Result<(), HandlerError> {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
        Ok(result) => result.map_err(HandlerError::from),
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osclink_core::{AcceptAny, ArgTypes};
    use parking_lot::Mutex;

    #[test]
    fn test_callback_receives_validated_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let binding = Binding::new(
            Pattern::compile("/test/*"),
            Arc::new(Callback::new(AcceptAny, move |m: Message| sink.lock().push(m))),
        );

        assert!(binding.matches("/test/a"));
        binding.invoke(&Message::new("/test/a")).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_validation_failure_skips_callback() {
        let binding = Binding::new(
            Pattern::compile("/test"),
            Arc::new(Callback::new(ArgTypes::new("i"), |_m: Message| {
                panic!("callback must not run")
            })),
        );

        let err = binding.invoke(&Message::new("/test")).unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
    }

    #[test]
    fn test_panic_is_reported() {
        let binding = Binding::new(
            Pattern::compile("/boom"),
            Arc::new(Callback::new(AcceptAny, |_m: Message| panic!("kaboom"))),
        );

        let err = binding.invoke(&Message::new("/boom")).unwrap_err();
        assert_eq!(err, HandlerError::Panicked("kaboom".to_string()));
    }
}
