//! Content authoring operations
//!
//! Thin service over the store and state machine: create drafts, attach
//! generated bodies, walk content through review, and soft-delete. Every
//! operation takes an [`OperationContext`] and leaves an audit row.

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditSink, OperationContext};
use crate::error::{Result, SyndicError};
use crate::state::ReviewDecision;
use crate::store::Store;
use crate::types::{ContentItem, DistributionStatus};

const UPDATE_RETRIES: u32 = 3;

pub struct ContentService {
    store: Store,
    audit: Arc<dyn AuditSink>,
}

impl ContentService {
    pub fn new(store: Store, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn create_draft(
        &self,
        ctx: &OperationContext,
        team_id: &str,
        title: &str,
    ) -> Result<ContentItem> {
        if title.trim().is_empty() {
            return Err(SyndicError::Validation("a title is required".to_string()));
        }
        let item = ContentItem::new(team_id.to_string(), ctx.actor_id.clone(), title.to_string());
        self.store.insert_content(&item).await?;
        self.audit
            .log(
                ctx,
                "create_draft",
                "content",
                &item.id,
                serde_json::json!({ "team_id": team_id, "title": title }),
            )
            .await;
        info!(content = %item.id, team = team_id, "draft created");
        Ok(item)
    }

    /// Attach a generated body, moving the draft to Generated.
    pub async fn record_generated(
        &self,
        ctx: &OperationContext,
        content_id: &str,
        body: String,
    ) -> Result<ContentItem> {
        let item = self
            .mutate(content_id, |item| item.record_generated(body.clone()))
            .await?;
        self.audit
            .log(
                ctx,
                "record_generated",
                "content",
                content_id,
                serde_json::json!({ "body_len": body.len() }),
            )
            .await;
        Ok(item)
    }

    pub async fn submit_for_approval(
        &self,
        ctx: &OperationContext,
        content_id: &str,
    ) -> Result<ContentItem> {
        let item = self
            .mutate(content_id, |item| item.submit_for_approval())
            .await?;
        self.audit
            .log(
                ctx,
                "submit_for_approval",
                "content",
                content_id,
                serde_json::json!({}),
            )
            .await;
        Ok(item)
    }

    pub async fn review(
        &self,
        ctx: &OperationContext,
        content_id: &str,
        decision: ReviewDecision,
    ) -> Result<ContentItem> {
        let action = match &decision {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject { .. } => "reject",
        };
        let item = self
            .mutate(content_id, |item| item.review(decision.clone()))
            .await?;
        self.audit
            .log(
                ctx,
                action,
                "content",
                content_id,
                serde_json::json!({ "status": item.status.as_str() }),
            )
            .await;
        info!(content = content_id, action, "content reviewed");
        Ok(item)
    }

    /// Soft-delete. Refused while any distribution is pending or in flight;
    /// cancel those first.
    pub async fn delete(&self, ctx: &OperationContext, content_id: &str) -> Result<()> {
        let live = self
            .store
            .distributions_for_content(content_id)
            .await?
            .into_iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DistributionStatus::Pending | DistributionStatus::InFlight
                )
            })
            .count();
        if live > 0 {
            return Err(SyndicError::Conflict(format!(
                "content {} has {} live distribution(s); cancel them first",
                content_id, live
            )));
        }

        self.mutate(content_id, |item| {
            item.deleted = true;
            Ok(())
        })
        .await?;
        self.audit
            .log(ctx, "delete", "content", content_id, serde_json::json!({}))
            .await;
        info!(content = content_id, "content deleted");
        Ok(())
    }

    pub async fn get(&self, content_id: &str) -> Result<ContentItem> {
        match self.store.get_content(content_id).await? {
            Some(item) if !item.deleted => Ok(item),
            _ => Err(SyndicError::NotFound(format!("content {}", content_id))),
        }
    }

    /// Read-modify-write with optimistic retries. The closure is reapplied to
    /// a fresh read on every version conflict, so it must be pure in the item.
    async fn mutate<F>(&self, content_id: &str, mut apply: F) -> Result<ContentItem>
    where
        F: FnMut(&mut ContentItem) -> Result<()>,
    {
        for _ in 0..UPDATE_RETRIES {
            let mut item = self.get(content_id).await?;
            apply(&mut item)?;
            match self.store.update_content(&mut item).await {
                Ok(()) => return Ok(item),
                Err(SyndicError::ConcurrencyConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SyndicError::ConcurrencyConflict {
            entity: "content",
            id: content_id.to_string(),
        })
    }
}
