//! Post lifecycle state machine
//!
//! Every status change in the engine flows through this module. Each
//! transition is a single conditional update in the database, so the
//! guard and the write are one atomic step even with several workers
//! running against the same file.

use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::types::{PostStatus, PublishReceipt};

/// Guarded transitions for the post lifecycle.
///
/// Legal moves: Draft -> Scheduled -> Publishing -> Published | Failed,
/// plus Failed -> Publishing while the retry cap has not been reached,
/// and Draft | Scheduled | Failed -> Scheduled on (re)scheduling.
/// Published is terminal. Every method returns whether the transition
/// won; a `false` result means another actor moved the post first and
/// the caller must back off.
#[derive(Clone)]
pub struct PostStateMachine {
    db: Database,
    retry_cap: u32,
}

impl PostStateMachine {
    pub fn new(db: Database, retry_cap: u32) -> Self {
        Self { db, retry_cap }
    }

    /// Move a post into SCHEDULED with a target time. Valid from DRAFT,
    /// SCHEDULED (reschedule), and FAILED (manual retry).
    pub async fn to_scheduled(&self, post_id: &str, scheduled_at: i64) -> Result<bool> {
        let ok = self.db.set_scheduled(post_id, scheduled_at).await?;
        debug!(post_id, scheduled_at, ok, "transition to scheduled");
        Ok(ok)
    }

    /// Claim a SCHEDULED post for publishing. This is the mutual-exclusion
    /// point: of any number of workers holding the same job, exactly one
    /// gets `true` here.
    pub async fn begin_publishing(&self, post_id: &str) -> Result<bool> {
        let ok = self
            .db
            .cas_status(post_id, PostStatus::Scheduled, PostStatus::Publishing)
            .await?;
        debug!(post_id, ok, "transition scheduled -> publishing");
        Ok(ok)
    }

    /// Claim a FAILED post for a retry attempt. Refused once the post has
    /// consumed its retry budget.
    pub async fn begin_retry(&self, post_id: &str) -> Result<bool> {
        let ok = self
            .db
            .cas_publishing_from_failed(post_id, self.retry_cap)
            .await?;
        debug!(post_id, ok, "transition failed -> publishing");
        Ok(ok)
    }

    /// Record a successful publish. Only valid from PUBLISHING.
    pub async fn complete(
        &self,
        post_id: &str,
        receipt: &PublishReceipt,
        published_at: i64,
    ) -> Result<bool> {
        let ok = self
            .db
            .mark_published(
                post_id,
                &receipt.external_id,
                receipt.external_url.as_deref(),
                published_at,
            )
            .await?;
        debug!(post_id, external_id = %receipt.external_id, ok, "transition publishing -> published");
        Ok(ok)
    }

    /// Record a failed publish attempt. Only valid from PUBLISHING;
    /// increments the retry count.
    pub async fn fail(&self, post_id: &str, reason: &str) -> Result<bool> {
        let ok = self.db.mark_failed(post_id, reason).await?;
        debug!(post_id, reason, ok, "transition publishing -> failed");
        Ok(ok)
    }

    pub fn retry_cap(&self) -> u32 {
        self.retry_cap
    }
}
