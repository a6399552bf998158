//! Aggregate identities and the explicit identity registry.
//!
//! An [`Identity`] is a `(tag, suffix)` pair rendered as `"{Tag}_{Suffix}"`,
//! e.g. `"Order_1"`. The tag names the aggregate type, so any id string found in
//! the commit log can be routed back to its aggregate type without reflection:
//! tags are registered once, at startup, in an [`IdentityConverter`].
//!
//! # Example
//!
//! ```
//! use eventide_core::identity::{Identity, IdentityConverter};
//!
//! let mut converter = IdentityConverter::new();
//! converter.register("Order", "order").unwrap();
//!
//! let id = converter.to_identity("Order_42").unwrap();
//! assert_eq!(id.tag(), "Order");
//! assert_eq!(id.as_number(), Some(42));
//! assert_eq!(converter.aggregate_type(&id).unwrap(), "order");
//! assert!(converter.to_identity("Invoice_1").is_err());
//! ```

use crate::aggregate::AggregateState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between tag and suffix.
pub const SEPARATOR: char = '_';

/// Errors raised while building or resolving identities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The string is not of the form `{Tag}_{Suffix}`.
    #[error("Invalid identity: {0}")]
    InvalidFormat(String),

    /// The tag was never registered.
    #[error("Unknown identity type: {0}")]
    UnknownIdentityType(String),

    /// The tag is already registered for another aggregate type.
    #[error("Identity tag already registered: {0}")]
    DuplicateTag(String),
}

/// Opaque aggregate identity.
///
/// Immutable once constructed. Serializes as its string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    tag: String,
    suffix: String,
}

impl Identity {
    /// Build an identity from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidFormat`] if the tag is empty or contains
    /// the separator, or if the suffix is empty.
    pub fn new(tag: impl Into<String>, suffix: impl Into<String>) -> Result<Self, IdentityError> {
        let tag = tag.into();
        let suffix = suffix.into();
        if tag.is_empty() || tag.contains(SEPARATOR) {
            return Err(IdentityError::InvalidFormat(format!(
                "tag '{tag}' must be non-empty and must not contain '{SEPARATOR}'"
            )));
        }
        if suffix.is_empty() {
            return Err(IdentityError::InvalidFormat(format!(
                "identity with tag '{tag}' has an empty suffix"
            )));
        }
        Ok(Self { tag, suffix })
    }

    /// Build an identity with a numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidFormat`] if the tag is invalid.
    pub fn numeric(tag: impl Into<String>, number: u64) -> Result<Self, IdentityError> {
        Self::new(tag, number.to_string())
    }

    /// The aggregate type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The suffix (everything after the first separator).
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The suffix as a number, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        self.suffix.parse().ok()
    }

    /// Extract the tag portion of a raw id string without validating the rest.
    #[must_use]
    pub fn tag_of(raw: &str) -> Option<&str> {
        raw.split_once(SEPARATOR).map(|(tag, _)| tag)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.tag, self.suffix)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, suffix) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| IdentityError::InvalidFormat(s.to_string()))?;
        Self::new(tag, suffix)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

/// A strongly typed identity bound to one tag.
///
/// Implement this for newtypes like `OrderId(Identity)` so they can be parsed
/// through [`IdentityConverter::try_parse`].
pub trait TypedIdentity: Sized {
    /// Tag this identity type owns.
    const TAG: &'static str;

    /// Wrap an already validated identity.
    fn from_identity(id: Identity) -> Self;

    /// Borrow the underlying identity.
    fn identity(&self) -> &Identity;
}

/// Explicit startup-time table from identity tag to aggregate type name.
#[derive(Debug, Clone, Default)]
pub struct IdentityConverter {
    tags: HashMap<String, String>,
}

impl IdentityConverter {
    /// Create an empty converter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag for an aggregate type.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::DuplicateTag`] if the tag is already registered,
    /// or [`IdentityError::InvalidFormat`] if the tag contains the separator.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        aggregate_type: impl Into<String>,
    ) -> Result<(), IdentityError> {
        let tag = tag.into();
        if tag.is_empty() || tag.contains(SEPARATOR) {
            return Err(IdentityError::InvalidFormat(tag));
        }
        if self.tags.contains_key(&tag) {
            return Err(IdentityError::DuplicateTag(tag));
        }
        self.tags.insert(tag, aggregate_type.into());
        Ok(())
    }

    /// Register the tag declared by an aggregate state type.
    ///
    /// # Errors
    ///
    /// See [`IdentityConverter::register`].
    pub fn register_state<S: AggregateState>(&mut self) -> Result<(), IdentityError> {
        self.register(S::TAG, S::AGGREGATE_TYPE)
    }

    /// Whether a tag is known.
    #[must_use]
    pub fn is_registered(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// Parse and validate an id string against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidFormat`] for malformed input and
    /// [`IdentityError::UnknownIdentityType`] for unregistered tags.
    pub fn to_identity(&self, raw: &str) -> Result<Identity, IdentityError> {
        let id: Identity = raw.parse()?;
        if !self.is_registered(id.tag()) {
            return Err(IdentityError::UnknownIdentityType(id.tag().to_string()));
        }
        Ok(id)
    }

    /// Render an identity as its storage string.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn to_string(&self, id: &Identity) -> String {
        id.to_string()
    }

    /// Parse an id string into a typed identity, if it carries `T`'s tag.
    #[must_use]
    pub fn try_parse<T: TypedIdentity>(&self, raw: &str) -> Option<T> {
        self.to_identity(raw)
            .ok()
            .filter(|id| id.tag() == T::TAG)
            .map(T::from_identity)
    }

    /// Resolve the aggregate type name of an identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UnknownIdentityType`] for unregistered tags.
    pub fn aggregate_type(&self, id: &Identity) -> Result<&str, IdentityError> {
        self.tags
            .get(id.tag())
            .map(String::as_str)
            .ok_or_else(|| IdentityError::UnknownIdentityType(id.tag().to_string()))
    }
}
