//! Message validators
//!
//! Every handler binding declares what it accepts. A validator either
//! converts the message into the binding's input type or rejects it with a
//! [`ValidationError`]; rejection never aborts delivery to other bindings.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::{Message, ValidationError};

/// Validate-and-convert capability for one message schema
pub trait Validator: Send + Sync + 'static {
    /// Value handed to the callback on success
    type Output: Send + 'static;

    fn validate(&self, message: &Message) -> Result<Self::Output, ValidationError>;
}

/// Accepts every message unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAny;

impl Validator for AcceptAny {
    type Output = Message;

    fn validate(&self, message: &Message) -> Result<Message, ValidationError> {
        Ok(message.clone())
    }
}

/// Accepts messages whose type tag string equals the declared signature.
///
/// ```
/// use osclink_core::{ArgTypes, Message, Validator};
///
/// let gain = ArgTypes::new("if");
/// assert!(gain.validate(&Message::new("/gain").with_arg(1).with_arg(0.5f32)).is_ok());
/// assert!(gain.validate(&Message::new("/gain").with_arg(1)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTypes {
    tags: String,
}

impl ArgTypes {
    /// A leading ',' is accepted and ignored
    pub fn new(tags: &str) -> Self {
        Self {
            tags: tags.trim_start_matches(',').to_string(),
        }
    }

    pub fn tags(&self) -> &str {
        &self.tags
    }
}

impl Validator for ArgTypes {
    type Output = Message;

    fn validate(&self, message: &Message) -> Result<Message, ValidationError> {
        let actual = message.type_tags();
        if actual == self.tags {
            Ok(message.clone())
        } else {
            Err(ValidationError::TypeTags {
                expected: self.tags.clone(),
                actual,
            })
        }
    }
}

/// Deserializes the message document into `T`.
///
/// The document has the shape `{"address": ..., "args": [...]}`, so `T` is
/// usually a struct with an `address` field and an `args` tuple:
///
/// ```
/// use osclink_core::{Message, Schema, Validator};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Level {
///     address: String,
///     args: (i32, f32),
/// }
///
/// let level = Schema::<Level>::new()
///     .validate(&Message::new("/level").with_arg(3).with_arg(0.25f32))
///     .unwrap();
/// assert_eq!(level.address, "/level");
/// assert_eq!(level.args, (3, 0.25));
/// ```
pub struct Schema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Schema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Validator for Schema<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, message: &Message) -> Result<T, ValidationError> {
        let document = message
            .to_document()
            .map_err(|e| ValidationError::Schema(e.to_string()))?;
        serde_json::from_value(document).map_err(|e| ValidationError::Schema(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Status {
        address: String,
        args: (String,),
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Strict {
        required_field: String,
    }

    #[test]
    fn test_accept_any() {
        let msg = Message::new("/any").with_arg(1);
        assert_eq!(AcceptAny.validate(&msg).unwrap(), msg);
    }

    #[test]
    fn test_arg_types_mismatch() {
        let err = ArgTypes::new(",s")
            .validate(&Message::new("/x").with_arg(1))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeTags {
                expected: "s".to_string(),
                actual: "i".to_string(),
            }
        );
    }

    #[test]
    fn test_schema_success() {
        let status = Schema::<Status>::new()
            .validate(&Message::new("/status").with_arg("ok"))
            .unwrap();
        assert_eq!(
            status,
            Status {
                address: "/status".to_string(),
                args: ("ok".to_string(),),
            }
        );
    }

    #[test]
    fn test_schema_missing_field() {
        let result = Schema::<Strict>::new().validate(&Message::new("/test"));
        assert!(matches!(result, Err(ValidationError::Schema(_))));
    }
}
