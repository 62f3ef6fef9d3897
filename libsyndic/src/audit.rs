//! Audit trail boundary
//!
//! Every mutating operation receives an explicit [`OperationContext`] naming
//! the actor; there is no ambient request state, because distributions fire
//! from background workers with no request affinity. Sinks are fire-and-forget
//! and must never fail the operation they describe.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::store::Store;

/// Who performed an operation and from where
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub actor_id: String,
    pub source_ip: Option<String>,
}

impl OperationContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            source_ip: None,
        }
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    /// Context for actions the scheduler takes on its own (timer fires,
    /// recovery scans).
    pub fn system() -> Self {
        Self::new("system")
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(
        &self,
        ctx: &OperationContext,
        action: &str,
        entity: &str,
        entity_id: &str,
        metadata: Value,
    );
}

/// Persists audit rows in the same database as the entities they describe
pub struct SqliteAuditSink {
    store: Store,
}

impl SqliteAuditSink {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn log(
        &self,
        ctx: &OperationContext,
        action: &str,
        entity: &str,
        entity_id: &str,
        metadata: Value,
    ) {
        if let Err(e) = self
            .store
            .insert_audit_row(ctx, action, entity, entity_id, &metadata)
            .await
        {
            warn!(action, entity, entity_id, "failed to write audit row: {}", e);
        }
    }
}

/// Sink for tests and tools that only need the trail in the logs
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(
        &self,
        ctx: &OperationContext,
        action: &str,
        entity: &str,
        entity_id: &str,
        metadata: Value,
    ) {
        info!(
            actor = %ctx.actor_id,
            action,
            entity,
            entity_id,
            metadata = %metadata,
            "audit"
        );
    }
}
