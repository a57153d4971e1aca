//! Decoded packet types
//!
//! These are produced by the wire decoder and are immutable once built.
//! Serialization renders a message as a plain document:
//! ```text
//! {"address": "/mixer/1/gain", "args": [0.5, "db", true]}
//! ```

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::TimeTag;

/// A single message argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// 32-bit signed integer (`i`)
    Int(i32),
    /// 32-bit float (`f`)
    Float(f32),
    /// UTF-8 string (`s`)
    String(String),
    /// Boolean true (`T`)
    True,
    /// Boolean false (`F`)
    False,
    /// Binary blob (`b`)
    Blob(Vec<u8>),
    /// 64-bit NTP timetag (`t`)
    TimeTag(TimeTag),
    /// 64-bit float (`d`)
    Double(f64),
    /// ASCII character (`c`)
    Char(char),
    /// Nested array (`[...]`)
    Array(Vec<Arg>),
}

impl Arg {
    /// Get the OSC type tag character. Arrays report their opening bracket.
    pub fn type_tag(&self) -> char {
        match self {
            Arg::Int(_) => 'i',
            Arg::Float(_) => 'f',
            Arg::String(_) => 's',
            Arg::True => 'T',
            Arg::False => 'F',
            Arg::Blob(_) => 'b',
            Arg::TimeTag(_) => 't',
            Arg::Double(_) => 'd',
            Arg::Char(_) => 'c',
            Arg::Array(_) => '[',
        }
    }

    fn write_tags(&self, out: &mut String) {
        match self {
            Arg::Array(items) => {
                out.push('[');
                for item in items {
                    item.write_tags(out);
                }
                out.push(']');
            }
            other => out.push(other.type_tag()),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Arg::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::True => Some(true),
            Arg::False => Some(false),
            _ => None,
        }
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Double(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        if v {
            Arg::True
        } else {
            Arg::False
        }
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::String(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::String(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

impl From<TimeTag> for Arg {
    fn from(v: TimeTag) -> Self {
        Arg::TimeTag(v)
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(v: Vec<Arg>) -> Self {
        Arg::Array(v)
    }
}

impl Serialize for Arg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Arg::Int(i) => serializer.serialize_i32(*i),
            Arg::Float(f) => serializer.serialize_f32(*f),
            Arg::String(s) => serializer.serialize_str(s),
            Arg::True => serializer.serialize_bool(true),
            Arg::False => serializer.serialize_bool(false),
            Arg::Blob(b) => serializer.collect_seq(b),
            Arg::TimeTag(t) => serializer.serialize_u64(t.raw()),
            Arg::Double(d) => serializer.serialize_f64(*d),
            Arg::Char(c) => serializer.serialize_char(*c),
            Arg::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// A decoded message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg>,
}

impl Message {
    /// Create a message with no arguments
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Create a message with arguments
    pub fn with_args(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Append an argument (builder style)
    pub fn with_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Get the type tag string, without the leading ','
    pub fn type_tags(&self) -> String {
        let mut out = String::with_capacity(self.args.len());
        for arg in &self.args {
            arg.write_tags(&mut out);
        }
        out
    }

    /// Render the message as a JSON document
    pub fn to_document(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A time-tagged group of packets
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub timetag: TimeTag,
    pub elements: Vec<Packet>,
}

impl Bundle {
    pub fn new(timetag: TimeTag, elements: Vec<Packet>) -> Self {
        Self { timetag, elements }
    }

    /// Create a bundle to be delivered on receipt
    pub fn immediate(elements: Vec<Packet>) -> Self {
        Self::new(TimeTag::IMMEDIATELY, elements)
    }

    /// Count leaf messages, descending into nested bundles
    pub fn message_count(&self) -> usize {
        self.elements
            .iter()
            .map(|element| match element {
                Packet::Message(_) => 1,
                Packet::Bundle(inner) => inner.message_count(),
            })
            .sum()
    }
}

/// Anything the decoder yields per wire unit
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}
