//! Publish scheduler
//!
//! Owns the durable job queue and drives posts through their lifecycle.
//! A worker process polls the queue, claims due jobs, and executes each
//! publish pipeline: claim the post, resolve valid credentials, call the
//! platform adapter, commit the outcome, and fan out notifications.
//! Several workers may run against the same database; the conditional
//! updates in the job claim and the post state machine keep each post's
//! publish exactly-once.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::SchedulerConfig;
use crate::db::{Database, QueueStats};
use crate::error::{PlatformError, Result, SyndicastError};
use crate::notify::NotificationFanout;
use crate::platforms::AdapterRegistry;
use crate::state::PostStateMachine;
use crate::tokens::TokenLifecycleManager;
use crate::types::{job_id_for, now_ts, Post, PostStatus, ScheduledJob};

/// Snapshot of a post and its pending queue entry, for status queries.
#[derive(Debug, Clone)]
pub struct PostSnapshot {
    pub post: Post,
    pub job: Option<ScheduledJob>,
}

pub struct PublishScheduler {
    db: Database,
    state: PostStateMachine,
    tokens: Arc<TokenLifecycleManager>,
    registry: AdapterRegistry,
    fanout: Arc<NotificationFanout>,
    backoff: BackoffPolicy,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl PublishScheduler {
    pub fn new(
        db: Database,
        tokens: Arc<TokenLifecycleManager>,
        registry: AdapterRegistry,
        fanout: Arc<NotificationFanout>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let backoff = BackoffPolicy::new(
            std::time::Duration::from_secs(config.backoff_base_secs),
            config.retry_cap,
        );
        Arc::new(Self {
            state: PostStateMachine::new(db.clone(), config.retry_cap),
            permits: Arc::new(Semaphore::new(config.workers)),
            db,
            tokens,
            registry,
            fanout,
            backoff,
            config,
        })
    }

    /// Schedule a post for publication at `scheduled_at`.
    ///
    /// Idempotent: rescheduling an already-scheduled post moves its single
    /// queue entry rather than adding a second one. Valid from DRAFT,
    /// SCHEDULED, and FAILED.
    pub async fn schedule(&self, post_id: &str, scheduled_at: i64) -> Result<()> {
        if !self.state.to_scheduled(post_id, scheduled_at).await? {
            let status = self
                .db
                .get_post(post_id)
                .await?
                .map(|p| p.status.to_string());
            return Err(SyndicastError::InvalidInput(match status {
                Some(status) => format!(
                    "post {} cannot be scheduled from status '{}'",
                    post_id, status
                ),
                None => format!("unknown post: {}", post_id),
            }));
        }

        self.db
            .upsert_job(&job_id_for(post_id), post_id, scheduled_at, now_ts())
            .await?;

        info!(post_id, scheduled_at, "post scheduled");
        Ok(())
    }

    /// Cancel a pending scheduled post, returning it to DRAFT.
    ///
    /// Returns false when there was nothing to cancel: no queue entry, or
    /// a worker already claimed the job and the publish is in flight.
    pub async fn cancel(&self, post_id: &str) -> Result<bool> {
        if !self.db.cancel_job(post_id, now_ts()).await? {
            return Ok(false);
        }

        self.state_back_to_draft(post_id).await?;
        info!(post_id, "scheduled post cancelled");
        Ok(true)
    }

    async fn state_back_to_draft(&self, post_id: &str) -> Result<()> {
        // Post may legitimately not be in SCHEDULED (e.g. cancel of a
        // failed post's pending retry); only the scheduled case reverts
        let _ = self
            .db
            .cas_status(post_id, PostStatus::Scheduled, PostStatus::Draft)
            .await?;
        Ok(())
    }

    /// Publish a post immediately, bypassing its wait but not the
    /// pipeline: the post still moves through SCHEDULED and the queue so
    /// a crash mid-publish is recovered like any other job.
    pub async fn publish_now(self: &Arc<Self>, post_id: &str) -> Result<Post> {
        let now = now_ts();
        if !self.state.to_scheduled(post_id, now).await? {
            return Err(SyndicastError::InvalidInput(format!(
                "post {} cannot be published from its current status",
                post_id
            )));
        }

        let job_id = job_id_for(post_id);
        self.db.upsert_job(&job_id, post_id, now, now).await?;

        if self
            .db
            .claim_job(&job_id, now, self.config.visibility_timeout_secs)
            .await?
        {
            if let Some(job) = self.db.get_job(post_id).await? {
                self.clone().execute_job(job).await;
            }
        }

        self.db
            .get_post(post_id)
            .await?
            .ok_or_else(|| SyndicastError::InvalidInput(format!("unknown post: {}", post_id)))
    }

    /// Current status of a post together with its queue entry, if any.
    pub async fn post_status(&self, post_id: &str) -> Result<PostSnapshot> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| SyndicastError::InvalidInput(format!("unknown post: {}", post_id)))?;
        let job = self.db.get_job(post_id).await?;
        Ok(PostSnapshot { post, job })
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.db.queue_stats().await
    }

    pub async fn pending(&self, limit: usize) -> Result<Vec<ScheduledJob>> {
        self.db.list_pending_jobs(limit).await
    }

    /// One poll cycle: claim every due job and execute them, bounded by
    /// the worker limit. Returns how many jobs were claimed.
    pub async fn poll_once(self: &Arc<Self>) -> Result<usize> {
        let now = now_ts();
        let jobs = self
            .db
            .claim_due_jobs(now, self.config.visibility_timeout_secs, 100)
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }
        debug!(count = jobs.len(), "claimed due jobs");

        let claimed = jobs.len();
        let mut set = JoinSet::new();
        for job in jobs {
            let scheduler = self.clone();
            let permits = self.permits.clone();
            set.spawn(async move {
                // Closed semaphore cannot happen; permit loss would only
                // skip this job until its claim expires
                if let Ok(_permit) = permits.acquire().await {
                    scheduler.execute_job(job).await;
                }
            });
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "publish task panicked");
            }
        }

        Ok(claimed)
    }

    /// Execute one claimed job end to end. Never returns an error: every
    /// outcome is committed to the post and the queue.
    async fn execute_job(self: Arc<Self>, job: ScheduledJob) {
        let post = match self.db.get_post(&job.post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                warn!(post_id = %job.post_id, "job references deleted post, dropping");
                let _ = self.db.delete_job(&job.id).await;
                return;
            }
            Err(e) => {
                error!(post_id = %job.post_id, error = %e, "failed to load post for job");
                return;
            }
        };

        // Claim the post itself. Exactly one worker wins this CAS even if
        // the same post somehow has overlapping claims.
        let claimed = match post.status {
            PostStatus::Scheduled => self.state.begin_publishing(&post.id).await,
            PostStatus::Failed => self.state.begin_retry(&post.id).await,
            PostStatus::Publishing => {
                // A previous worker died mid-publish and its claim lapsed.
                // The platform call may or may not have landed; without a
                // receipt the post stays PUBLISHING for operator review
                // rather than risking a duplicate publish.
                warn!(post_id = %post.id, "post stuck in publishing, leaving for review");
                let _ = self.db.delete_job(&job.id).await;
                return;
            }
            PostStatus::Draft | PostStatus::Published => {
                debug!(post_id = %post.id, status = %post.status, "stale job, dropping");
                let _ = self.db.delete_job(&job.id).await;
                return;
            }
        };

        match claimed {
            Ok(true) => {}
            Ok(false) => {
                debug!(post_id = %post.id, "lost publish claim to another worker");
                return;
            }
            Err(e) => {
                error!(post_id = %post.id, error = %e, "claim transition failed");
                return;
            }
        }

        self.run_publish(&post, &job).await;
    }

    /// The post is in PUBLISHING and owned by this worker; run the
    /// platform call and commit the outcome.
    async fn run_publish(&self, post: &Post, job: &ScheduledJob) {
        let outcome = self.attempt_publish(post).await;

        match outcome {
            Ok(receipt) => {
                match self.state.complete(&post.id, &receipt, now_ts()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(post_id = %post.id, "publish landed but post left publishing state");
                        return;
                    }
                    Err(e) => {
                        error!(post_id = %post.id, error = %e, "failed to record publish");
                        return;
                    }
                }
                let _ = self.db.delete_job(&job.id).await;

                info!(post_id = %post.id, external_id = %receipt.external_id, "post published");
                if let Ok(Some(published)) = self.db.get_post(&post.id).await {
                    if let Ok(Some(platform)) =
                        self.account_platform(&published.account_id).await
                    {
                        self.fanout.post_published(&published, platform).await;
                    }
                }
            }
            Err(e) => self.commit_failure(post, job, e).await,
        }
    }

    async fn attempt_publish(
        &self,
        post: &Post,
    ) -> std::result::Result<crate::types::PublishReceipt, PlatformError> {
        let account = self
            .tokens
            .ensure_valid(&post.account_id)
            .await
            .map_err(credential_failure)?;

        let adapter = self.registry.get(account.platform)?;
        adapter.publish_post(&account.credentials, post).await
    }

    async fn commit_failure(&self, post: &Post, job: &ScheduledJob, error: PlatformError) {
        warn!(post_id = %post.id, error = %error, "publish attempt failed");

        if let Err(e) = self.state.fail(&post.id, &error.to_string()).await {
            error!(post_id = %post.id, error = %e, "failed to record failure");
            return;
        }

        // A credential rejection from the platform means the stored token
        // is dead regardless of its expiry; let the token lifecycle try a
        // refresh and deactivate the account when it cannot.
        if matches!(error, PlatformError::Auth(_)) {
            if let Err(e) = self.tokens.handle_auth_rejection(&post.account_id).await {
                error!(post_id = %post.id, error = %e, "auth rejection handling failed");
            }
        }

        let failed = match self.db.get_post(&post.id).await {
            Ok(Some(post)) => post,
            _ => return,
        };

        let retryable = error.is_retryable()
            && self.backoff.allows_retry(failed.retry_count as u32);

        if retryable {
            let delay = self.backoff.delay_after(failed.retry_count as u32);
            let due_at = now_ts() + delay.as_secs() as i64;
            if let Err(e) = self.db.requeue_job(&job.id, due_at).await {
                error!(post_id = %post.id, error = %e, "failed to requeue for retry");
                return;
            }
            info!(post_id = %post.id, attempt = failed.retry_count, due_at, "retry scheduled");
        } else {
            let _ = self.db.delete_job(&job.id).await;
            info!(post_id = %post.id, retries = failed.retry_count, "post terminally failed");
            if let Ok(Some(platform)) = self.account_platform(&failed.account_id).await {
                self.fanout
                    .post_failed(&failed, platform, &error.to_string())
                    .await;
            }
        }
    }

    async fn account_platform(
        &self,
        account_id: &str,
    ) -> Result<Option<crate::types::PlatformKind>> {
        self.db.get_account_platform(account_id).await
    }
}

/// Normalize credential-load failures into platform errors. Storage
/// hiccups are transient and must stay retryable; only genuine
/// credential problems become permanent Auth failures.
fn credential_failure(error: SyndicastError) -> PlatformError {
    match error {
        SyndicastError::Platform(p) => p,
        SyndicastError::Database(e) => {
            PlatformError::Network(format!("credential load failed: {}", e))
        }
        other => PlatformError::Auth(other.to_string()),
    }
}
