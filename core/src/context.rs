//! Explicit per-command context.
//!
//! Everything a save needs to stamp on a changeset (who issued the command,
//! which request it belongs to, which tenant it runs for) travels in a
//! [`CommandContext`] passed down the call chain.

use crate::changeset::{Headers, header};
use crate::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Caller identity and correlation data for one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    /// User the command runs as.
    pub user_id: Option<String>,
    /// Correlation id shared by everything the command causes.
    pub correlation_id: String,
    /// Tenant the command runs for.
    pub tenant_id: Option<String>,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandContext {
    /// Anonymous context with a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_id: None,
            correlation_id: Uuid::new_v4().to_string(),
            tenant_id: None,
        }
    }

    /// Set the issuing user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Commit headers for a changeset written at `now`.
    #[must_use]
    pub fn headers(&self, now: DateTime<Utc>) -> Headers {
        let mut headers = Headers::new();
        headers.insert(header::TIMESTAMP.into(), Value::String(now.to_rfc3339()));
        headers.insert(header::CORRELATION_ID.into(), Value::String(self.correlation_id.clone()));
        if let Some(user) = &self.user_id {
            headers.insert(header::ISSUED_BY.into(), Value::String(user.clone()));
        }
        if let Some(tenant) = &self.tenant_id {
            headers.insert(header::TENANT_ID.into(), Value::String(tenant.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn headers_include_only_known_fields() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).single();
        let ctx = CommandContext::new().with_user("User_7").with_correlation_id("req-1");

        let headers = ctx.headers(now.unwrap_or_default());
        assert_eq!(headers[header::ISSUED_BY], "User_7");
        assert_eq!(headers[header::CORRELATION_ID], "req-1");
        assert_eq!(headers[header::TIMESTAMP], "2025-03-01T08:30:00+00:00");
        assert!(!headers.contains_key(header::TENANT_ID));
    }

    #[test]
    fn tenant_is_stamped_when_set() {
        let headers = CommandContext::new().with_tenant("acme").headers(Utc::now());
        assert_eq!(headers[header::TENANT_ID], "acme");
        assert!(!headers.contains_key(header::ISSUED_BY));
    }

    #[test]
    fn fresh_contexts_have_distinct_correlation_ids() {
        assert_ne!(CommandContext::new().correlation_id, CommandContext::new().correlation_id);
    }
}
