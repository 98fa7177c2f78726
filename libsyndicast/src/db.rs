//! Database operations for Syndicast
//!
//! All persistence goes through this module: posts with their CAS-guarded
//! status transitions, encrypted account credentials, the durable job
//! queue, notifications, and webhook endpoints. Credential encryption and
//! decryption happen here and nowhere else.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    ContentType, Credentials, NotificationEvent, PlatformKind, Post, PostStatus, ScheduledJob,
    SocialAccount,
};
use crate::vault::TokenVault;

/// An owner's configured outbound webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub id: String,
    pub owner_id: String,
    pub url: String,
    pub secret: String,
}

/// Queue counters for the stats command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub pending_jobs: i64,
    pub next_due_at: Option<i64>,
    pub posts_by_status: Vec<(String, i64)>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();

        if expanded_path != ":memory:" {
            let path = Path::new(&expanded_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Forward slashes for the SQLite URL, mode=rwc so the file is
        // created on first run
        let db_url = if expanded_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"))
        };

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        let media_urls =
            serde_json::to_string(&post.media_urls).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, account_id, content, content_type, media_urls,
                               status, scheduled_at, published_at, platform_post_id,
                               platform_post_url, error_message, retry_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(&post.account_id)
        .bind(&post.content)
        .bind(post.content_type.as_str())
        .bind(media_urls)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.published_at)
        .bind(&post.platform_post_id)
        .bind(&post.platform_post_url)
        .bind(&post.error_message)
        .bind(post.retry_count)
        .bind(post.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, account_id, content, content_type, media_urls, status,
                   scheduled_at, published_at, platform_post_id, platform_post_url,
                   error_message, retry_count, created_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(row_to_post))
    }

    /// Update content and media URLs. Permitted only while the post is in
    /// an editable status; returns false if the post was not editable
    /// (or does not exist).
    pub async fn update_post_content(
        &self,
        post_id: &str,
        content: &str,
        media_urls: &[String],
    ) -> Result<bool> {
        let media_urls = serde_json::to_string(media_urls).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            UPDATE posts SET content = ?, media_urls = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(content)
        .bind(media_urls)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Compare-and-swap status transition. Writes `to` only if the stored
    /// status still equals `from`; the returned bool is the CAS outcome.
    /// This conditional update is the sole concurrency guard against two
    /// workers publishing the same post.
    pub async fn cas_status(
        &self,
        post_id: &str,
        from: PostStatus,
        to: PostStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE posts SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(post_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// CAS into PUBLISHING from FAILED, additionally requiring the retry
    /// cap not to be exhausted.
    pub async fn cas_publishing_from_failed(&self, post_id: &str, retry_cap: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'publishing'
            WHERE id = ? AND status = 'failed' AND retry_count < ?
            "#,
        )
        .bind(post_id)
        .bind(retry_cap as i64)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// PUBLISHING -> PUBLISHED with the platform receipt.
    pub async fn mark_published(
        &self,
        post_id: &str,
        external_id: &str,
        external_url: Option<&str>,
        published_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'published', published_at = ?, platform_post_id = ?,
                platform_post_url = ?, error_message = NULL
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(published_at)
        .bind(external_id)
        .bind(external_url)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// PUBLISHING -> FAILED. Increments retry_count, which only ever moves
    /// on a failed publish attempt.
    pub async fn mark_failed(&self, post_id: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'failed', error_message = ?, retry_count = retry_count + 1
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(reason)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a post back to SCHEDULED with a new target time. Valid from
    /// DRAFT, SCHEDULED, or FAILED.
    pub async fn set_scheduled(&self, post_id: &str, scheduled_at: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'scheduled', scheduled_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled', 'failed')
            "#,
        )
        .bind(scheduled_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a post unless it is mid-publish. Returns false when the row
    /// exists but is PUBLISHING (the in-flight call must resolve first).
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ? AND status != 'publishing'")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_posts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM posts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    // ========================================================================
    // Social accounts (credentials encrypted at this boundary)
    // ========================================================================

    pub async fn create_account(&self, account: &SocialAccount, vault: &TokenVault) -> Result<()> {
        let blob = vault.encode_credentials(&account.credentials)?;

        sqlx::query(
            r#"
            INSERT INTO social_accounts (id, owner_id, platform, credentials,
                                         token_expires_at, is_active, display_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.owner_id)
        .bind(account.platform.as_str())
        .bind(blob)
        .bind(account.credentials.expires_at)
        .bind(account.is_active as i64)
        .bind(&account.display_name)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(
        &self,
        account_id: &str,
        vault: &TokenVault,
    ) -> Result<Option<SocialAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, platform, credentials, is_active, display_name, created_at
            FROM social_accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        match row {
            Some(r) => Ok(Some(row_to_account(&r, vault)?)),
            None => Ok(None),
        }
    }

    /// Platform of an account without decrypting its credentials.
    pub async fn get_account_platform(&self, account_id: &str) -> Result<Option<PlatformKind>> {
        let row = sqlx::query("SELECT platform FROM social_accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.and_then(|r| PlatformKind::parse(&r.get::<String, _>("platform"))))
    }

    /// Replace an account's credential tuple after a refresh.
    pub async fn update_account_credentials(
        &self,
        account_id: &str,
        credentials: &Credentials,
        vault: &TokenVault,
    ) -> Result<()> {
        let blob = vault.encode_credentials(credentials)?;

        sqlx::query(
            "UPDATE social_accounts SET credentials = ?, token_expires_at = ? WHERE id = ?",
        )
        .bind(blob)
        .bind(credentials.expires_at)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Activate or deactivate an account. A deactivated account blocks all
    /// further publish and refresh attempts until externally reconnected.
    pub async fn set_account_active(&self, account_id: &str, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE social_accounts SET is_active = ? WHERE id = ?")
            .bind(is_active as i64)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_active_accounts(&self, vault: &TokenVault) -> Result<Vec<SocialAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, platform, credentials, is_active, display_name, created_at
            FROM social_accounts WHERE is_active = 1
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(|r| row_to_account(r, vault)).collect()
    }

    // ========================================================================
    // Durable job queue
    // ========================================================================

    /// Create or replace the job for a post. The deterministic id makes
    /// this an upsert: rescheduling resets the due time and attempt count
    /// and releases any stale claim, never producing a second row.
    pub async fn upsert_job(
        &self,
        job_id: &str,
        post_id: &str,
        due_at: i64,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, post_id, due_at, attempts, claimed_until, created_at)
            VALUES (?, ?, ?, 0, NULL, ?)
            ON CONFLICT(id) DO UPDATE
            SET due_at = excluded.due_at, attempts = 0, claimed_until = NULL
            "#,
        )
        .bind(job_id)
        .bind(post_id)
        .bind(due_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_job(&self, post_id: &str) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query(
            r#"
            SELECT id, post_id, due_at, attempts, claimed_until, created_at
            FROM scheduled_jobs WHERE post_id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| row_to_job(&r)))
    }

    /// Remove a pending job if it has not been claimed. Returns false if
    /// there was nothing to cancel (no job, or a worker already started).
    pub async fn cancel_job(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduled_jobs
            WHERE post_id = ? AND (claimed_until IS NULL OR claimed_until < ?)
            "#,
        )
        .bind(post_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a job unconditionally (after a terminal publish attempt).
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Claim up to `limit` due jobs for this worker. Candidates are jobs
    /// whose due time has passed and whose claim (if any) has expired; each
    /// is claimed with a conditional update so two workers polling at once
    /// cannot take the same job.
    pub async fn claim_due_jobs(
        &self,
        now: i64,
        visibility_timeout_secs: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, due_at, attempts, claimed_until, created_at
            FROM scheduled_jobs
            WHERE due_at <= ? AND (claimed_until IS NULL OR claimed_until < ?)
            ORDER BY due_at
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut claimed = Vec::new();
        for row in &rows {
            let mut job = row_to_job(row);
            let until = now + visibility_timeout_secs;

            let result = sqlx::query(
                r#"
                UPDATE scheduled_jobs SET claimed_until = ?
                WHERE id = ? AND due_at <= ? AND (claimed_until IS NULL OR claimed_until < ?)
                "#,
            )
            .bind(until)
            .bind(&job.id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

            if result.rows_affected() == 1 {
                job.claimed_until = Some(until);
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    /// Claim one specific job if it is due and unclaimed.
    pub async fn claim_job(
        &self,
        job_id: &str,
        now: i64,
        visibility_timeout_secs: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs SET claimed_until = ?
            WHERE id = ? AND due_at <= ? AND (claimed_until IS NULL OR claimed_until < ?)
            "#,
        )
        .bind(now + visibility_timeout_secs)
        .bind(job_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Push a claimed job back into the future for a retry.
    pub async fn requeue_job(&self, job_id: &str, due_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET due_at = ?, attempts = attempts + 1, claimed_until = NULL
            WHERE id = ?
            "#,
        )
        .bind(due_at)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, due_at, attempts, claimed_until, created_at
            FROM scheduled_jobs ORDER BY due_at LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_job).collect())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query("SELECT COUNT(*) AS n, MIN(due_at) AS next FROM scheduled_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(QueueStats {
            pending_jobs: row.get("n"),
            next_due_at: row.get("next"),
            posts_by_status: self.count_posts_by_status().await?,
        })
    }

    // ========================================================================
    // Notifications and webhook endpoints
    // ========================================================================

    pub async fn create_notification(&self, event: &NotificationEvent, now: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = event.payload.to_string();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, payload, high_priority, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&event.target_user_id)
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(event.high_priority as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(id)
    }

    pub async fn count_notifications_for_user(&self, user_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM notifications WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.get("n"))
    }

    pub async fn create_webhook_endpoint(
        &self,
        owner_id: &str,
        url: &str,
        secret: &str,
        now: i64,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (id, owner_id, url, secret, is_active, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(url)
        .bind(secret)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(id)
    }

    pub async fn active_webhooks_for_owner(&self, owner_id: &str) -> Result<Vec<WebhookEndpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, url, secret
            FROM webhook_endpoints WHERE owner_id = ? AND is_active = 1
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| WebhookEndpoint {
                id: r.get("id"),
                owner_id: r.get("owner_id"),
                url: r.get("url"),
                secret: r.get("secret"),
            })
            .collect())
    }
}

fn row_to_post(r: sqlx::sqlite::SqliteRow) -> Post {
    let media_urls: Vec<String> =
        serde_json::from_str(&r.get::<String, _>("media_urls")).unwrap_or_default();

    Post {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        account_id: r.get("account_id"),
        content: r.get("content"),
        content_type: ContentType::parse(&r.get::<String, _>("content_type"))
            .unwrap_or(ContentType::Text),
        media_urls,
        status: PostStatus::parse(&r.get::<String, _>("status")).unwrap_or(PostStatus::Draft),
        scheduled_at: r.get("scheduled_at"),
        published_at: r.get("published_at"),
        platform_post_id: r.get("platform_post_id"),
        platform_post_url: r.get("platform_post_url"),
        error_message: r.get("error_message"),
        retry_count: r.get("retry_count"),
        created_at: r.get("created_at"),
    }
}

fn row_to_account(r: &sqlx::sqlite::SqliteRow, vault: &TokenVault) -> Result<SocialAccount> {
    let blob: Vec<u8> = r.get("credentials");
    let credentials = vault.decode_credentials(&blob)?;

    Ok(SocialAccount {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        platform: PlatformKind::parse(&r.get::<String, _>("platform"))
            .ok_or_else(|| DbError::NotFound("unknown platform for account".to_string()))?,
        credentials,
        is_active: r.get::<i64, _>("is_active") != 0,
        display_name: r.get("display_name"),
        created_at: r.get("created_at"),
    })
}

fn row_to_job(r: &sqlx::sqlite::SqliteRow) -> ScheduledJob {
    ScheduledJob {
        id: r.get("id"),
        post_id: r.get("post_id"),
        due_at: r.get("due_at"),
        attempts: r.get("attempts"),
        claimed_until: r.get("claimed_until"),
        created_at: r.get("created_at"),
    }
}
