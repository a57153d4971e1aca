//! osclink Core
//!
//! Core types and pure algorithms shared by the osclink crates.
//!
//! This crate provides:
//! - Decoded packet types ([`Message`], [`Bundle`], [`Packet`], [`Arg`])
//! - OSC address pattern compilation and matching ([`Pattern`])
//! - NTP timetag conversion ([`TimeTag`])
//! - Message validators used by handler bindings ([`Validator`])

pub mod address;
pub mod error;
pub mod schema;
pub mod time;
pub mod types;

pub use address::Pattern;
pub use error::{Error, Result, ValidationError};
pub use schema::{AcceptAny, ArgTypes, Schema, Validator};
pub use time::{TimeTag, NTP_EPOCH_OFFSET};
pub use types::*;
