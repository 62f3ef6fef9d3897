//! Distribution scheduling and publish execution
//!
//! The scheduler owns the lifecycle of a distribution from creation to a
//! terminal status. Fire times are tracked two ways: an in-process timer per
//! pending distribution for punctual delivery, and a periodic sweep of due
//! rows in the store that catches anything a timer missed. Both paths converge
//! on [`Scheduler::execute`], which is safe to call any number of times for
//! the same distribution because a compare-and-set in the store lets exactly
//! one caller run the attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditSink, OperationContext};
use crate::error::{Result, SyndicError};
use crate::events::{Event, EventBus};
use crate::platforms::PublisherRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state;
use crate::store::Store;
use crate::tokens::TokenManager;
use crate::types::{
    ContentDistribution, ContentItem, ContentStatus, DistributionStatus, Platform, PublishReport,
    PublishingWindow, ScheduledContentRow, SocialMediaPostRequest,
};

pub const DEFAULT_IN_FLIGHT_GRACE_SECS: i64 = 300;

/// How many times an optimistic content update is reapplied before giving up
const CONTENT_UPDATE_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    registry: Arc<PublisherRegistry>,
    tokens: Arc<TokenManager>,
    policy: RetryPolicy,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
    /// Attempts in flight longer than this are presumed lost after a restart
    in_flight_grace_secs: i64,
    // Each armed timer carries the generation it was created with, so a
    // finished timer task only removes its own map entry, never a replacement
    // armed while it ran.
    timers: Mutex<HashMap<String, (u64, JoinHandle<()>)>>,
    timer_generation: AtomicU64,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        registry: Arc<PublisherRegistry>,
        tokens: Arc<TokenManager>,
        policy: RetryPolicy,
        events: EventBus,
        audit: Arc<dyn AuditSink>,
        in_flight_grace_secs: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                tokens,
                policy,
                events,
                audit,
                in_flight_grace_secs,
                timers: Mutex::new(HashMap::new()),
                timer_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Create a distribution for approved content and enqueue it.
    ///
    /// Returns the new distribution's id. Fails when the publish time is not
    /// in the future, the content is not in a schedulable status, no publisher
    /// handles the platform, or a live distribution for the same (content,
    /// platform) pair already exists.
    pub async fn schedule(
        &self,
        ctx: &OperationContext,
        content_id: &str,
        platform: Platform,
        publish_at: i64,
        retry_interval_secs: Option<i64>,
        max_retry_count: u32,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let window = PublishingWindow::new(publish_at, retry_interval_secs, max_retry_count, now)?;

        if !self.inner.registry.supports(platform) {
            return Err(SyndicError::UnsupportedPlatform(format!(
                "no publisher registered for {}",
                platform
            )));
        }

        let content = self.require_content(content_id).await?;
        if !matches!(
            content.status,
            ContentStatus::Approved | ContentStatus::Scheduled
        ) {
            return Err(SyndicError::StateTransition {
                entity: "content",
                id: content_id.to_string(),
                from: content.status.to_string(),
                to: ContentStatus::Scheduled.to_string(),
            });
        }

        let dist = ContentDistribution::new(content_id.to_string(), platform, window);
        self.inner.store.insert_distribution(&dist).await?;

        if content.status == ContentStatus::Approved {
            self.update_content_status(content_id, ContentStatus::Scheduled)
                .await?;
        }

        self.inner
            .audit
            .log(
                ctx,
                "schedule",
                "distribution",
                &dist.id,
                serde_json::json!({
                    "content_id": content_id,
                    "platform": platform.as_str(),
                    "publish_at": publish_at,
                    "max_retry_count": max_retry_count,
                }),
            )
            .await;

        self.inner.events.emit(Event::DistributionScheduled {
            distribution_id: dist.id.clone(),
            content_id: content_id.to_string(),
            team_id: content.team_id.clone(),
            platform,
            publish_at,
        });

        info!(
            distribution = %dist.id,
            content = content_id,
            platform = %platform,
            publish_at,
            "distribution scheduled"
        );
        self.enqueue(&dist.id, dist.next_attempt_at);
        Ok(dist.id)
    }

    /// Cancel a pending distribution.
    ///
    /// Cancelling a distribution that already reached a terminal status
    /// (published, failed, or cancelled) is a no-op success; only an attempt
    /// currently in flight is a conflict.
    pub async fn cancel(&self, ctx: &OperationContext, distribution_id: &str) -> Result<()> {
        let dist = self.require_distribution(distribution_id).await?;

        match dist.status {
            DistributionStatus::Cancelled
            | DistributionStatus::Published
            | DistributionStatus::Failed => return Ok(()),
            DistributionStatus::InFlight => {
                return Err(SyndicError::Conflict(format!(
                    "distribution {} has an attempt in flight",
                    distribution_id
                )));
            }
            DistributionStatus::Pending => {}
        }

        if !self.inner.store.cancel_if_pending(distribution_id).await? {
            // Lost a race; re-read to decide between no-op and conflict.
            let current = self.require_distribution(distribution_id).await?;
            return if current.status.is_terminal() {
                Ok(())
            } else {
                Err(SyndicError::Conflict(format!(
                    "distribution {} has an attempt in flight",
                    distribution_id
                )))
            };
        }
        self.abort_timer(distribution_id);

        let content = self.require_content(&dist.content_id).await?;
        self.inner
            .audit
            .log(
                ctx,
                "cancel",
                "distribution",
                distribution_id,
                serde_json::json!({ "content_id": dist.content_id }),
            )
            .await;
        self.inner.events.emit(Event::DistributionCancelled {
            distribution_id: distribution_id.to_string(),
            content_id: dist.content_id.clone(),
            team_id: content.team_id,
            platform: dist.platform,
        });

        info!(distribution = distribution_id, "distribution cancelled");
        self.reevaluate_content(&dist.content_id).await?;
        Ok(())
    }

    /// Run one publish attempt for a distribution.
    ///
    /// Idempotent under concurrent invocation: only the caller that wins the
    /// Pending -> InFlight compare-and-set performs the attempt, everyone else
    /// returns immediately.
    pub async fn execute(&self, distribution_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        if !self.inner.store.begin_attempt(distribution_id, now).await? {
            debug!(
                distribution = distribution_id,
                "skipping attempt, distribution is not pending"
            );
            return Ok(());
        }

        // Reload for the post-CAS attempt count.
        let dist = self.require_distribution(distribution_id).await?;
        let content = match self.inner.store.get_content(&dist.content_id).await? {
            Some(content) if !content.deleted => content,
            _ => {
                let report = PublishReport::failure("content no longer exists", false);
                return self.settle_failure(&dist, None, report).await;
            }
        };

        let report = self.attempt_publish(&dist, &content).await;
        if report.success {
            self.settle_success(&dist, &content, report).await
        } else {
            self.settle_failure(&dist, Some(&content), report).await
        }
    }

    async fn attempt_publish(
        &self,
        dist: &ContentDistribution,
        content: &ContentItem,
    ) -> PublishReport {
        let access_token = match self
            .inner
            .tokens
            .get_valid_access_token(&content.team_id, dist.platform)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => {
                // A revoked credential will never come back on its own;
                // anything else might be fixed before retries run out.
                let revoked = matches!(
                    self.inner
                        .tokens
                        .account(&content.team_id, dist.platform)
                        .await,
                    Ok(Some(account)) if account.revoked
                );
                return PublishReport::failure(
                    format!("no valid {} credential for team {}", dist.platform, content.team_id),
                    !revoked,
                );
            }
            Err(e) => return PublishReport::failure(format!("token lookup failed: {}", e), true),
        };

        let publisher = match self.inner.registry.get(dist.platform) {
            Ok(publisher) => publisher,
            Err(e) => return PublishReport::failure(e.to_string(), false),
        };

        let request = SocialMediaPostRequest {
            title: content.title.clone(),
            body: content.body.clone(),
            caption: None,
            hashtags: Vec::new(),
            media_urls: Vec::new(),
            team_id: content.team_id.clone(),
            access_token,
        };
        publisher.publish(&request).await
    }

    async fn settle_success(
        &self,
        dist: &ContentDistribution,
        content: &ContentItem,
        report: PublishReport,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let external_post_id = report
            .external_post_id
            .unwrap_or_else(|| "unknown".to_string());
        self.inner
            .store
            .mark_published(&dist.id, now, &external_post_id)
            .await?;

        self.inner
            .audit
            .log(
                &OperationContext::system(),
                "publish",
                "distribution",
                &dist.id,
                serde_json::json!({
                    "platform": dist.platform.as_str(),
                    "external_post_id": external_post_id,
                    "attempt_count": dist.attempt_count,
                }),
            )
            .await;
        self.inner.events.emit(Event::DistributionPublished {
            distribution_id: dist.id.clone(),
            content_id: dist.content_id.clone(),
            team_id: content.team_id.clone(),
            platform: dist.platform,
            external_post_id: external_post_id.clone(),
            attempt_count: dist.attempt_count,
        });

        info!(
            distribution = %dist.id,
            platform = %dist.platform,
            external_post_id = %external_post_id,
            attempt = dist.attempt_count,
            "distribution published"
        );
        self.reevaluate_content(&dist.content_id).await
    }

    async fn settle_failure(
        &self,
        dist: &ContentDistribution,
        content: Option<&ContentItem>,
        report: PublishReport,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        match self
            .inner
            .policy
            .decide(&report, dist.attempt_count, &dist.window, now)
        {
            RetryDecision::Retry { next_attempt_at } => {
                self.inner
                    .store
                    .requeue_for_retry(&dist.id, next_attempt_at)
                    .await?;
                warn!(
                    distribution = %dist.id,
                    attempt = dist.attempt_count,
                    next_attempt_at,
                    "publish attempt failed, will retry: {}",
                    report.error_message.as_deref().unwrap_or("unknown error")
                );
                self.enqueue(&dist.id, next_attempt_at);
                Ok(())
            }
            RetryDecision::Fail { reason } => {
                self.inner.store.mark_failed(&dist.id, &reason).await?;

                let siblings = self
                    .inner
                    .store
                    .distributions_for_content(&dist.content_id)
                    .await?;
                let partial_failure = siblings
                    .iter()
                    .any(|d| d.status == DistributionStatus::Published);

                let team_id = match content {
                    Some(content) => content.team_id.clone(),
                    None => self
                        .inner
                        .store
                        .get_content(&dist.content_id)
                        .await?
                        .map(|c| c.team_id)
                        .unwrap_or_default(),
                };

                self.inner
                    .audit
                    .log(
                        &OperationContext::system(),
                        "publish_failed",
                        "distribution",
                        &dist.id,
                        serde_json::json!({
                            "platform": dist.platform.as_str(),
                            "reason": reason,
                            "attempt_count": dist.attempt_count,
                        }),
                    )
                    .await;
                self.inner.events.emit(Event::DistributionFailed {
                    distribution_id: dist.id.clone(),
                    content_id: dist.content_id.clone(),
                    team_id,
                    platform: dist.platform,
                    reason: reason.clone(),
                    partial_failure,
                });

                error!(
                    distribution = %dist.id,
                    platform = %dist.platform,
                    attempts = dist.attempt_count,
                    partial_failure,
                    "distribution failed: {}",
                    reason
                );
                // Failed siblings keep the content Scheduled; the event above
                // is the operator's signal.
                self.reevaluate_content(&dist.content_id).await
            }
        }
    }

    /// Execute everything pending and due as of `now`. Returns how many
    /// distributions were picked up.
    pub async fn dispatch_due(&self, now: i64) -> Result<usize> {
        let due = self.inner.store.due_distributions(now).await?;
        let count = due.len();
        for dist in due {
            if let Err(e) = self.execute(&dist.id).await {
                error!(distribution = %dist.id, "dispatch failed: {}", e);
            }
        }
        Ok(count)
    }

    /// Rebuild scheduler state after a restart.
    ///
    /// Pending distributions get their timers back (past-due ones fire
    /// immediately). In-flight rows older than the grace period lost their
    /// attempt with the previous process; they go back through the retry
    /// policy as a retryable failure.
    pub async fn recover(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let pending = self.inner.store.pending_distributions().await?;
        let pending_count = pending.len();
        for dist in pending {
            self.enqueue(&dist.id, dist.next_attempt_at);
        }

        let cutoff = now - self.inner.in_flight_grace_secs;
        let stale = self.inner.store.stale_in_flight(cutoff).await?;
        let stale_count = stale.len();
        for dist in stale {
            let report = PublishReport::failure("attempt lost before completion", true);
            self.settle_failure(&dist, None, report).await?;
        }

        info!(
            pending = pending_count,
            recovered_in_flight = stale_count,
            "scheduler recovery complete"
        );
        Ok(())
    }

    /// Operator-facing listing of a team's distributions, newest first
    pub async fn list_scheduled(
        &self,
        team_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ScheduledContentRow>> {
        self.inner
            .store
            .scheduled_for_team(team_id, page, page_size)
            .await
    }

    /// Distribution counts by status
    pub async fn stats(&self) -> Result<Vec<(DistributionStatus, i64)>> {
        self.inner.store.distribution_counts().await
    }

    /// Abort all in-process timers. Pending rows stay in the store and are
    /// re-enqueued by the next `recover`.
    pub fn shutdown_timers(&self) {
        let mut timers = self.inner.timers.lock().unwrap();
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn active_timer_count(&self) -> usize {
        self.inner.timers.lock().unwrap().len()
    }

    fn enqueue(&self, distribution_id: &str, fire_at: i64) {
        let scheduler = self.clone();
        let id = distribution_id.to_string();
        let generation = self.inner.timer_generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                let now = chrono::Utc::now().timestamp();
                let delay = (fire_at - now).max(0) as u64;
                if delay > 0 {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                if let Err(e) = scheduler.execute(&id).await {
                    error!(distribution = %id, "timer execution failed: {}", e);
                }
                // A retry inside `execute` may have armed a replacement timer
                // under the same id; only remove our own entry.
                let mut timers = scheduler.inner.timers.lock().unwrap();
                if timers.get(&id).is_some_and(|(gen, _)| *gen == generation) {
                    timers.remove(&id);
                }
            }
        });

        // A reschedule replaces the old timer.
        if let Some((_, old)) = self
            .inner
            .timers
            .lock()
            .unwrap()
            .insert(id, (generation, handle))
        {
            old.abort();
        }
    }

    fn abort_timer(&self, distribution_id: &str) {
        if let Some((_, handle)) = self.inner.timers.lock().unwrap().remove(distribution_id) {
            handle.abort();
        }
    }

    async fn require_distribution(&self, id: &str) -> Result<ContentDistribution> {
        self.inner
            .store
            .get_distribution(id)
            .await?
            .ok_or_else(|| SyndicError::NotFound(format!("distribution {}", id)))
    }

    async fn require_content(&self, id: &str) -> Result<ContentItem> {
        match self.inner.store.get_content(id).await? {
            Some(content) if !content.deleted => Ok(content),
            _ => Err(SyndicError::NotFound(format!("content {}", id))),
        }
    }

    /// Recompute the aggregate content status from its distributions and
    /// apply the resulting transition, if any.
    async fn reevaluate_content(&self, content_id: &str) -> Result<()> {
        let content = match self.inner.store.get_content(content_id).await? {
            Some(content) => content,
            None => return Ok(()),
        };
        if content.status != ContentStatus::Scheduled {
            return Ok(());
        }

        let statuses: Vec<DistributionStatus> = self
            .inner
            .store
            .distributions_for_content(content_id)
            .await?
            .iter()
            .map(|d| d.status)
            .collect();

        let Some(target) = state::evaluate_aggregate(&statuses) else {
            return Ok(());
        };
        if target == content.status {
            return Ok(());
        }

        self.update_content_status(content_id, target).await?;
        if target == ContentStatus::Published {
            self.inner.events.emit(Event::ContentPublished {
                content_id: content_id.to_string(),
                team_id: content.team_id.clone(),
            });
            info!(content = content_id, "content fully published");
        }
        Ok(())
    }

    /// Apply a status transition under optimistic concurrency, re-reading and
    /// reapplying on version conflicts.
    async fn update_content_status(&self, content_id: &str, target: ContentStatus) -> Result<()> {
        for _ in 0..CONTENT_UPDATE_RETRIES {
            let mut content = self.require_content(content_id).await?;
            if content.status == target {
                return Ok(());
            }
            state::transition(&mut content, target)?;
            match self.inner.store.update_content(&mut content).await {
                Ok(()) => return Ok(()),
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
