//! Capability grants held by an aggregate.
//!
//! Some business rules need a token-style capability on the aggregate itself,
//! e.g. "this document is locked by token X". [`Grants`] is a small component
//! that aggregate states embed and mutate from their `apply` handlers; it is
//! never persisted on its own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named capability and the token that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Capability name, e.g. `"file-lock"`.
    pub grant_name: String,
    /// Opaque token that holds the capability.
    pub token: String,
}

/// Set of grants keyed by grant name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    by_name: BTreeMap<String, String>,
}

impl Grants {
    /// Add or replace a grant. Call only from an event handler.
    pub fn add(&mut self, grant: Grant) {
        self.by_name.insert(grant.grant_name, grant.token);
    }

    /// Revoke a grant by name. Call only from an event handler.
    pub fn revoke(&mut self, grant_name: &str) -> Option<Grant> {
        self.by_name.remove(grant_name).map(|token| Grant {
            grant_name: grant_name.to_string(),
            token,
        })
    }

    /// Token currently holding `grant_name`.
    #[must_use]
    pub fn token(&self, grant_name: &str) -> Option<&str> {
        self.by_name.get(grant_name).map(String::as_str)
    }

    /// Whether `token` holds `grant_name`.
    #[must_use]
    pub fn is_granted(&self, grant_name: &str, token: &str) -> bool {
        self.token(grant_name) == Some(token)
    }

    /// All grants in name order.
    pub fn iter(&self) -> impl Iterator<Item = Grant> + '_ {
        self.by_name.iter().map(|(name, token)| Grant {
            grant_name: name.clone(),
            token: token.clone(),
        })
    }

    /// Number of grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no grants are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
