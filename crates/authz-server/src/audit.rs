//! Security audit events.
//!
//! Publishing is best-effort: a sink never fails the flow that emits an event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kinds of audited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    LoginDenied,
    ConsentGranted,
    ConsentDenied,
    AuthorizationCodeIssued,
    AuthorizationCodeReplayed,
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    TokenIntrospection,
    ClientAuthenticationFailure,
    Logout,
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub principal: Option<String>,
    pub client_id: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            principal: None,
            client_id: None,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    #[must_use]
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, event: AuditEvent);
}

/// Writes events as structured records on the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn publish(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        tracing::info!(
            target: "audit",
            event_type = ?event.event_type,
            principal = event.principal.as_deref().unwrap_or("-"),
            client_id = event.client_id.as_deref().unwrap_or("-"),
            details = %details,
            "audit event"
        );
    }
}

/// Keeps events in memory. Used by tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Events of one type.
    #[must_use]
    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|e| e.event_type == event_type).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn publish(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
