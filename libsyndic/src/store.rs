//! Persistence for content, distributions, and platform accounts
//!
//! SQLite via sqlx. Entity writes use optimistic concurrency (a `version`
//! column checked on every UPDATE); distribution status changes that gate
//! execution are compare-and-set statements whose row count tells the caller
//! whether it won the race.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::audit::OperationContext;
use crate::error::{DbError, Result, SyndicError};
use crate::types::{
    ContentDistribution, ContentItem, ContentStatus, DistributionStatus, Platform,
    PlatformAccount, PublishingWindow, ScheduledContentRow,
};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database at `db_path` and run
    /// migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows; mode=rwc creates
        // the file on first open.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// In-memory database for tests. A single connection, because every
    /// SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Content items
    // ------------------------------------------------------------------

    pub async fn insert_content(&self, item: &ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, team_id, author_id, title, body, status, review_note,
                 deleted, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.team_id)
        .bind(&item.author_id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.status.as_str())
        .bind(&item.review_note)
        .bind(item.deleted as i64)
        .bind(item.version)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, team_id, author_id, title, body, status, review_note,
                   deleted, version, created_at, updated_at
            FROM content_items WHERE id = ?
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(content_from_row).transpose()
    }

    /// Write back a modified content item, checking the version it was read
    /// at. On success the in-memory version is bumped to match the row.
    pub async fn update_content(&self, item: &mut ContentItem) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET title = ?, body = ?, status = ?, review_note = ?, deleted = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.status.as_str())
        .bind(&item.review_note)
        .bind(item.deleted as i64)
        .bind(now)
        .bind(&item.id)
        .bind(item.version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return if self.get_content(&item.id).await?.is_some() {
                Err(SyndicError::ConcurrencyConflict {
                    entity: "content",
                    id: item.id.clone(),
                })
            } else {
                Err(SyndicError::NotFound(format!("content {}", item.id)))
            };
        }
        item.version += 1;
        item.updated_at = now;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Distributions
    // ------------------------------------------------------------------

    /// Insert a new distribution. The partial unique index rejects a second
    /// live distribution for the same (content, platform), which surfaces
    /// here as a Conflict.
    pub async fn insert_distribution(&self, dist: &ContentDistribution) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_distributions
                (id, content_id, platform, publish_at, retry_interval_secs,
                 max_retry_count, attempt_count, status, next_attempt_at,
                 started_at, published_at, external_post_id, failure_reason,
                 version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&dist.id)
        .bind(&dist.content_id)
        .bind(dist.platform.as_str())
        .bind(dist.window.publish_at)
        .bind(dist.window.retry_interval_secs)
        .bind(dist.window.max_retry_count as i64)
        .bind(dist.attempt_count as i64)
        .bind(dist.status.as_str())
        .bind(dist.next_attempt_at)
        .bind(dist.started_at)
        .bind(dist.published_at)
        .bind(&dist.external_post_id)
        .bind(&dist.failure_reason)
        .bind(dist.version)
        .bind(dist.created_at)
        .bind(dist.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let unique = e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false);
                if unique {
                    Err(SyndicError::Conflict(format!(
                        "an active distribution already exists for content {} on {}",
                        dist.content_id, dist.platform
                    )))
                } else {
                    Err(DbError::SqlxError(e).into())
                }
            }
        }
    }

    pub async fn get_distribution(&self, id: &str) -> Result<Option<ContentDistribution>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_distributions WHERE id = ?",
            DIST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(distribution_from_row).transpose()
    }

    /// The non-terminal distribution for (content, platform), if any
    pub async fn active_distribution(
        &self,
        content_id: &str,
        platform: Platform,
    ) -> Result<Option<ContentDistribution>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_distributions
            WHERE content_id = ? AND platform = ?
              AND status IN ('pending', 'in_flight')
            "#,
            DIST_COLUMNS
        ))
        .bind(content_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(distribution_from_row).transpose()
    }

    pub async fn distributions_for_content(
        &self,
        content_id: &str,
    ) -> Result<Vec<ContentDistribution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM content_distributions WHERE content_id = ? ORDER BY created_at",
            DIST_COLUMNS
        ))
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(distribution_from_row).collect()
    }

    /// Pending distributions due at or before `now`
    pub async fn due_distributions(&self, now: i64) -> Result<Vec<ContentDistribution>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_distributions
            WHERE status = 'pending' AND next_attempt_at <= ?
            ORDER BY next_attempt_at
            "#,
            DIST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(distribution_from_row).collect()
    }

    /// All pending distributions, due or not (startup recovery scan)
    pub async fn pending_distributions(&self) -> Result<Vec<ContentDistribution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM content_distributions WHERE status = 'pending' ORDER BY next_attempt_at",
            DIST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(distribution_from_row).collect()
    }

    /// In-flight distributions whose attempt started at or before `cutoff`.
    /// After a crash these have no recorded outcome and are treated as
    /// failed-and-retried.
    pub async fn stale_in_flight(&self, cutoff: i64) -> Result<Vec<ContentDistribution>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_distributions
            WHERE status = 'in_flight' AND started_at IS NOT NULL AND started_at <= ?
            "#,
            DIST_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(distribution_from_row).collect()
    }

    /// Compare-and-set gate: Pending -> InFlight, bumping the attempt count.
    ///
    /// Returns false when the distribution was not Pending (duplicate fire or
    /// already terminal); the caller must then do nothing.
    pub async fn begin_attempt(&self, id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE content_distributions
            SET status = 'in_flight', attempt_count = attempt_count + 1,
                started_at = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// InFlight -> Published with timestamp and external id
    pub async fn mark_published(
        &self,
        id: &str,
        published_at: i64,
        external_post_id: &str,
    ) -> Result<()> {
        self.finish_attempt(
            id,
            "published",
            Some(published_at),
            Some(external_post_id),
            None,
            None,
        )
        .await
    }

    /// InFlight -> Failed with a durable reason
    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        self.finish_attempt(id, "failed", None, None, Some(reason), None)
            .await
    }

    /// InFlight -> Pending with a new fire time (retry path)
    pub async fn requeue_for_retry(&self, id: &str, next_attempt_at: i64) -> Result<()> {
        self.finish_attempt(id, "pending", None, None, None, Some(next_attempt_at))
            .await
    }

    async fn finish_attempt(
        &self,
        id: &str,
        status: &str,
        published_at: Option<i64>,
        external_post_id: Option<&str>,
        failure_reason: Option<&str>,
        next_attempt_at: Option<i64>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE content_distributions
            SET status = ?, published_at = COALESCE(?, published_at),
                external_post_id = COALESCE(?, external_post_id),
                failure_reason = ?, next_attempt_at = COALESCE(?, next_attempt_at),
                started_at = NULL, version = version + 1, updated_at = ?
            WHERE id = ? AND status = 'in_flight'
            "#,
        )
        .bind(status)
        .bind(published_at)
        .bind(external_post_id)
        .bind(failure_reason)
        .bind(next_attempt_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(SyndicError::ConcurrencyConflict {
                entity: "distribution",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Pending -> Cancelled. Returns false when the distribution was not
    /// Pending; the caller decides whether that is a no-op or a conflict.
    pub async fn cancel_if_pending(&self, id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE content_distributions
            SET status = 'cancelled', version = version + 1, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Team-scoped scheduled content listing, newest first
    pub async fn scheduled_for_team(
        &self,
        team_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ScheduledContentRow>> {
        let page_size = page_size.clamp(1, 200) as i64;
        let offset = page.saturating_sub(1) as i64 * page_size;

        let rows = sqlx::query(
            r#"
            SELECT d.id AS distribution_id, d.content_id, c.title, d.platform,
                   d.status, d.publish_at, d.published_at, d.failure_reason
            FROM content_distributions d
            JOIN content_items c ON c.id = d.content_id
            WHERE c.team_id = ? AND c.deleted = 0
            ORDER BY d.publish_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(team_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.into_iter().map(scheduled_row_from_row).collect()
    }

    /// Distribution counts keyed by status, for queue statistics
    pub async fn distribution_counts(&self) -> Result<Vec<(DistributionStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM content_distributions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let status = parse_distribution_status(&r.get::<String, _>("status"))?;
                Ok((status, r.get::<i64, _>("n")))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Platform accounts
    // ------------------------------------------------------------------

    pub async fn upsert_account(&self, account: &PlatformAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_accounts
                (team_id, platform, account_name, access_token, refresh_token,
                 expires_at, revoked, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(team_id, platform) DO UPDATE SET
                account_name = excluded.account_name,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                revoked = excluded.revoked,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.team_id)
        .bind(account.platform.as_str())
        .bind(&account.account_name)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.expires_at)
        .bind(account.revoked as i64)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_account(
        &self,
        team_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformAccount>> {
        let row = sqlx::query(
            r#"
            SELECT team_id, platform, account_name, access_token, refresh_token,
                   expires_at, revoked, updated_at
            FROM platform_accounts WHERE team_id = ? AND platform = ?
            "#,
        )
        .bind(team_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(account_from_row).transpose()
    }

    /// Clear stored tokens and mark the credential revoked
    pub async fn revoke_account(&self, team_id: &str, platform: Platform) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE platform_accounts
            SET access_token = NULL, refresh_token = NULL, expires_at = NULL,
                revoked = 1, updated_at = ?
            WHERE team_id = ? AND platform = ?
            "#,
        )
        .bind(now)
        .bind(team_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    pub async fn insert_audit_row(
        &self,
        ctx: &OperationContext,
        action: &str,
        entity: &str,
        entity_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, source_ip, action, entity, entity_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ctx.actor_id)
        .bind(&ctx.source_ip)
        .bind(action)
        .bind(entity)
        .bind(entity_id)
        .bind(metadata.to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Audit actions recorded for an entity, oldest first
    pub async fn audit_actions_for(&self, entity: &str, entity_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT action FROM audit_log WHERE entity = ? AND entity_id = ? ORDER BY id",
        )
        .bind(entity)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get("action")).collect())
    }
}

const DIST_COLUMNS: &str = "id, content_id, platform, publish_at, retry_interval_secs, \
     max_retry_count, attempt_count, status, next_attempt_at, started_at, \
     published_at, external_post_id, failure_reason, version, created_at, updated_at";

fn parse_platform(s: &str) -> Result<Platform> {
    Platform::parse(s)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown platform '{}'", s)).into())
}

fn parse_content_status(s: &str) -> Result<ContentStatus> {
    ContentStatus::parse(s)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown content status '{}'", s)).into())
}

fn parse_distribution_status(s: &str) -> Result<DistributionStatus> {
    DistributionStatus::parse(s)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown distribution status '{}'", s)).into())
}

fn content_from_row(row: SqliteRow) -> Result<ContentItem> {
    Ok(ContentItem {
        id: row.get("id"),
        team_id: row.get("team_id"),
        author_id: row.get("author_id"),
        title: row.get("title"),
        body: row.get("body"),
        status: parse_content_status(&row.get::<String, _>("status"))?,
        review_note: row.get("review_note"),
        deleted: row.get::<i64, _>("deleted") != 0,
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn distribution_from_row(row: SqliteRow) -> Result<ContentDistribution> {
    Ok(ContentDistribution {
        id: row.get("id"),
        content_id: row.get("content_id"),
        platform: parse_platform(&row.get::<String, _>("platform"))?,
        window: PublishingWindow {
            publish_at: row.get("publish_at"),
            retry_interval_secs: row.get("retry_interval_secs"),
            max_retry_count: row.get::<i64, _>("max_retry_count") as u32,
        },
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        status: parse_distribution_status(&row.get::<String, _>("status"))?,
        next_attempt_at: row.get("next_attempt_at"),
        started_at: row.get("started_at"),
        published_at: row.get("published_at"),
        external_post_id: row.get("external_post_id"),
        failure_reason: row.get("failure_reason"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn account_from_row(row: SqliteRow) -> Result<PlatformAccount> {
    Ok(PlatformAccount {
        team_id: row.get("team_id"),
        platform: parse_platform(&row.get::<String, _>("platform"))?,
        account_name: row.get("account_name"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        revoked: row.get::<i64, _>("revoked") != 0,
        updated_at: row.get("updated_at"),
    })
}

fn scheduled_row_from_row(row: SqliteRow) -> Result<ScheduledContentRow> {
    Ok(ScheduledContentRow {
        distribution_id: row.get("distribution_id"),
        content_id: row.get("content_id"),
        title: row.get("title"),
        platform: parse_platform(&row.get::<String, _>("platform"))?,
        status: parse_distribution_status(&row.get::<String, _>("status"))?,
        publish_at: row.get("publish_at"),
        published_at: row.get("published_at"),
        failure_reason: row.get("failure_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentDistribution, ContentItem, PublishingWindow};

    async fn store_with_content() -> (Store, ContentItem) {
        let store = Store::in_memory().await.unwrap();
        let mut item = ContentItem::new("team-1".into(), "user-1".into(), "Launch".into());
        item.status = ContentStatus::Approved;
        item.body = "body".into();
        store.insert_content(&item).await.unwrap();
        (store, item)
    }

    fn future_window() -> PublishingWindow {
        PublishingWindow {
            publish_at: chrono::Utc::now().timestamp() + 3600,
            retry_interval_secs: None,
            max_retry_count: 3,
        }
    }

    #[tokio::test]
    async fn content_round_trip() {
        let (store, item) = store_with_content().await;
        let loaded = store.get_content(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Launch");
        assert_eq!(loaded.status, ContentStatus::Approved);
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn stale_version_write_is_a_concurrency_conflict() {
        let (store, item) = store_with_content().await;

        let mut first = store.get_content(&item.id).await.unwrap().unwrap();
        let mut second = store.get_content(&item.id).await.unwrap().unwrap();

        first.title = "Edited by first".into();
        store.update_content(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.title = "Edited by second".into();
        let err = store.update_content(&mut second).await.unwrap_err();
        assert!(matches!(
            err,
            SyndicError::ConcurrencyConflict {
                entity: "content",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn update_of_missing_content_is_not_found() {
        let store = Store::in_memory().await.unwrap();
        let mut ghost = ContentItem::new("t".into(), "u".into(), "ghost".into());
        let err = store.update_content(&mut ghost).await.unwrap_err();
        assert!(matches!(err, SyndicError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_active_distribution_is_rejected() {
        let (store, item) = store_with_content().await;
        let first = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&first).await.unwrap();

        let second = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        let err = store.insert_distribution(&second).await.unwrap_err();
        assert!(matches!(err, SyndicError::Conflict(_)));

        // A different platform is fine.
        let other = ContentDistribution::new(item.id.clone(), Platform::X, future_window());
        store.insert_distribution(&other).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_distribution_frees_the_slot() {
        let (store, item) = store_with_content().await;
        let first = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&first).await.unwrap();

        assert!(store.cancel_if_pending(&first.id).await.unwrap());

        let replacement =
            ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&replacement).await.unwrap();
    }

    #[tokio::test]
    async fn begin_attempt_is_a_single_winner_gate() {
        let (store, item) = store_with_content().await;
        let dist = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&dist).await.unwrap();

        let now = chrono::Utc::now().timestamp();
        assert!(store.begin_attempt(&dist.id, now).await.unwrap());
        // Duplicate fire: loses the compare-and-set.
        assert!(!store.begin_attempt(&dist.id, now).await.unwrap());

        let loaded = store.get_distribution(&dist.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DistributionStatus::InFlight);
        assert_eq!(loaded.attempt_count, 1);
        assert_eq!(loaded.started_at, Some(now));
    }

    #[tokio::test]
    async fn attempt_outcomes_update_status() {
        let (store, item) = store_with_content().await;
        let dist = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&dist).await.unwrap();
        let now = chrono::Utc::now().timestamp();

        store.begin_attempt(&dist.id, now).await.unwrap();
        store.requeue_for_retry(&dist.id, now + 60).await.unwrap();
        let loaded = store.get_distribution(&dist.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DistributionStatus::Pending);
        assert_eq!(loaded.next_attempt_at, now + 60);
        assert_eq!(loaded.started_at, None);

        store.begin_attempt(&dist.id, now).await.unwrap();
        store.mark_published(&dist.id, now, "ext-1").await.unwrap();
        let loaded = store.get_distribution(&dist.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DistributionStatus::Published);
        assert_eq!(loaded.published_at, Some(now));
        assert_eq!(loaded.external_post_id.as_deref(), Some("ext-1"));
        assert_eq!(loaded.attempt_count, 2);
    }

    #[tokio::test]
    async fn finishing_a_non_in_flight_attempt_is_a_conflict() {
        let (store, item) = store_with_content().await;
        let dist = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&dist).await.unwrap();

        let err = store.mark_failed(&dist.id, "oops").await.unwrap_err();
        assert!(matches!(err, SyndicError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn due_query_only_returns_ripe_pending_rows() {
        let (store, item) = store_with_content().await;
        let now = chrono::Utc::now().timestamp();

        let mut due = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        due.next_attempt_at = now - 10;
        store.insert_distribution(&due).await.unwrap();

        let mut later = ContentDistribution::new(item.id.clone(), Platform::X, future_window());
        later.next_attempt_at = now + 600;
        store.insert_distribution(&later).await.unwrap();

        let found = store.due_distributions(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        // In-flight rows never show up as due.
        store.begin_attempt(&due.id, now).await.unwrap();
        assert!(store.due_distributions(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_in_flight_scan_finds_lost_attempts() {
        let (store, item) = store_with_content().await;
        let dist = ContentDistribution::new(item.id.clone(), Platform::Meta, future_window());
        store.insert_distribution(&dist).await.unwrap();

        let long_ago = chrono::Utc::now().timestamp() - 1000;
        store.begin_attempt(&dist.id, long_ago).await.unwrap();

        let stale = store.stale_in_flight(long_ago + 300).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, dist.id);

        // A fresh attempt is not stale.
        assert!(store.stale_in_flight(long_ago - 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn team_listing_paginates_and_skips_deleted_content() {
        let store = Store::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();

        for i in 0..3 {
            let mut item = ContentItem::new("team-1".into(), "u".into(), format!("Post {}", i));
            item.status = ContentStatus::Scheduled;
            item.deleted = i == 2;
            store.insert_content(&item).await.unwrap();

            let mut dist = ContentDistribution::new(
                item.id.clone(),
                Platform::Meta,
                PublishingWindow {
                    publish_at: now + 3600 + i,
                    retry_interval_secs: None,
                    max_retry_count: 0,
                },
            );
            dist.next_attempt_at = dist.window.publish_at;
            store.insert_distribution(&dist).await.unwrap();
        }

        let page = store.scheduled_for_team("team-1", 1, 10).await.unwrap();
        assert_eq!(page.len(), 2, "deleted content must not be listed");

        let small = store.scheduled_for_team("team-1", 1, 1).await.unwrap();
        assert_eq!(small.len(), 1);
        let second = store.scheduled_for_team("team-1", 2, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(small[0].distribution_id, second[0].distribution_id);

        assert!(store
            .scheduled_for_team("team-2", 1, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn account_upsert_and_revoke() {
        let store = Store::in_memory().await.unwrap();
        let now = chrono::Utc::now().timestamp();
        let account = PlatformAccount {
            team_id: "team-1".into(),
            platform: Platform::LinkedIn,
            account_name: "Acme".into(),
            access_token: Some("tok-1".into()),
            refresh_token: Some("ref-1".into()),
            expires_at: Some(now + 3600),
            revoked: false,
            updated_at: now,
        };
        store.upsert_account(&account).await.unwrap();

        let mut updated = account.clone();
        updated.access_token = Some("tok-2".into());
        store.upsert_account(&updated).await.unwrap();

        let loaded = store
            .get_account("team-1", Platform::LinkedIn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("tok-2"));

        store.revoke_account("team-1", Platform::LinkedIn).await.unwrap();
        let revoked = store
            .get_account("team-1", Platform::LinkedIn)
            .await
            .unwrap()
            .unwrap();
        assert!(revoked.revoked);
        assert!(revoked.access_token.is_none());
        assert!(revoked.refresh_token.is_none());
    }

    #[tokio::test]
    async fn audit_rows_are_queryable_per_entity() {
        let store = Store::in_memory().await.unwrap();
        let ctx = OperationContext::new("user-1");
        store
            .insert_audit_row(&ctx, "schedule", "distribution", "d1", &serde_json::json!({}))
            .await
            .unwrap();
        store
            .insert_audit_row(&ctx, "cancel", "distribution", "d1", &serde_json::json!({}))
            .await
            .unwrap();

        let actions = store.audit_actions_for("distribution", "d1").await.unwrap();
        assert_eq!(actions, vec!["schedule".to_string(), "cancel".to_string()]);
    }
}
