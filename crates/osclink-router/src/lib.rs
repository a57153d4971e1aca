//! osclink Router
//!
//! The routing engine sits between the wire codec and application code:
//! - Matches incoming message addresses against registered patterns
//! - Delivers to every matching binding in registration order
//! - Executes bundles now or parks them until their timetag is due
//! - Correlates outgoing requests with their replies
//!
//! # Example
//!
//! ```
//! use osclink_core::{ArgTypes, Message};
//! use osclink_router::{Dispatcher, RouterConfig};
//!
//! let dispatcher = Dispatcher::new(RouterConfig::default());
//! dispatcher.add_handler_with("/synth/[0-9]/freq", ArgTypes::new("f"), |msg| {
//!     println!("{} -> {:?}", msg.address, msg.args);
//! });
//!
//! dispatcher
//!     .dispatch_message(&Message::new("/synth/2/freq").with_arg(440.0f32))
//!     .unwrap();
//! ```

pub mod binding;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod scheduler;

pub use binding::{Binding, BindingId, Callback, Handler};
pub use call::{CallCorrelator, CallOptions, MessageSender, DEFAULT_CALL_TIMEOUT};
pub use config::{RouterConfig, SchedulerConfig, ValidationPolicy};
pub use dispatcher::Dispatcher;
pub use error::{DeliveryFailure, HandlerError, Result, RouterError};
pub use scheduler::{decide, Decision, Scheduler};
