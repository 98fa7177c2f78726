//! End-to-end scenarios for the publishing engine
//!
//! Drives the full pipeline (queue, state machine, token lifecycle,
//! adapter, fanout) against an in-memory database and the mock adapter.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use libsyndicast::config::SchedulerConfig;
use libsyndicast::error::PlatformError;
use libsyndicast::notify::{NoopPush, NotificationFanout, WebhookSender};
use libsyndicast::platforms::mock::{MockAdapter, MockConfig};
use libsyndicast::platforms::AdapterRegistry;
use libsyndicast::types::{job_id_for, now_ts, Credentials, PlatformKind, SocialAccount};
use libsyndicast::{
    Database, Post, PostStatus, PublishScheduler, TokenLifecycleManager, TokenVault,
};

struct Harness {
    db: Database,
    vault: TokenVault,
    scheduler: Arc<PublishScheduler>,
    adapter: Arc<MockAdapter>,
}

fn vault() -> TokenVault {
    TokenVault::new(SecretString::from("scenario-passphrase".to_string()))
}

/// Build the engine around a mock adapter. Zero backoff base so retries
/// become due immediately.
async fn harness(adapter: MockAdapter) -> Harness {
    let db = Database::new(":memory:").await.unwrap();
    let adapter = Arc::new(adapter);
    let registry = AdapterRegistry::all_mock(adapter.clone());

    let tokens = Arc::new(TokenLifecycleManager::new(
        db.clone(),
        vault(),
        registry.clone(),
        300,
    ));
    let fanout = Arc::new(NotificationFanout::new(
        db.clone(),
        WebhookSender::new(Duration::from_secs(1)),
        Arc::new(NoopPush),
    ));

    let config = SchedulerConfig {
        poll_interval: 1,
        retry_cap: 3,
        backoff_base_secs: 0,
        visibility_timeout_secs: 300,
        workers: 4,
    };
    let scheduler = PublishScheduler::new(db.clone(), tokens, registry, fanout, config);

    Harness {
        db,
        vault: vault(),
        scheduler,
        adapter,
    }
}

async fn seeded_post(h: &Harness, content: &str) -> Post {
    let account = SocialAccount::new(
        "owner-1".to_string(),
        PlatformKind::Mastodon,
        Credentials::non_expiring("token".to_string()),
    );
    h.db.create_account(&account, &h.vault).await.unwrap();

    let post = Post::new("owner-1".to_string(), account.id, content.to_string());
    h.db.create_post(&post).await.unwrap();
    post
}

#[tokio::test]
async fn happy_path_publish_now() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "hello world").await;

    let published = h.scheduler.publish_now(&post.id).await.unwrap();

    assert_eq!(published.status, PostStatus::Published);
    assert!(published.platform_post_id.is_some());
    assert!(published.published_at.is_some());
    assert_eq!(published.retry_count, 0);

    // Queue entry is gone and the owner got a notification
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(
        h.db.count_notifications_for_user("owner-1").await.unwrap(),
        1
    );
    assert_eq!(h.adapter.published_content(), vec!["hello world".to_string()]);
}

#[tokio::test]
async fn scheduled_post_publishes_when_due() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "later").await;

    // Due in the past: claimable on the next poll
    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    let claimed = h.scheduler.poll_once().await.unwrap();
    assert_eq!(claimed, 1);

    let loaded = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PostStatus::Published);
}

#[tokio::test]
async fn future_post_stays_queued() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "not yet").await;

    h.scheduler.schedule(&post.id, now_ts() + 3600).await.unwrap();
    assert_eq!(h.scheduler.poll_once().await.unwrap(), 0);

    let loaded = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PostStatus::Scheduled);
    assert!(h.db.get_job(&post.id).await.unwrap().is_some());
}

#[tokio::test]
async fn scheduling_is_idempotent() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "move me").await;

    let first = now_ts() + 1000;
    let second = now_ts() + 9000;
    h.scheduler.schedule(&post.id, first).await.unwrap();
    h.scheduler.schedule(&post.id, second).await.unwrap();

    let jobs = h.db.list_pending_jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].due_at, second);
    assert_eq!(jobs[0].id, job_id_for(&post.id));
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let adapter = MockAdapter::failing_then_ok(
        PlatformKind::Mastodon,
        vec![PlatformError::Network("connection reset".to_string())],
    );
    let h = harness(adapter).await;
    let post = seeded_post(&h, "flaky network").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();

    // First poll: attempt fails, post goes FAILED, job requeued
    h.scheduler.poll_once().await.unwrap();
    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.is_some());
    assert!(h.db.get_job(&post.id).await.unwrap().is_some());

    // Second poll (zero backoff): retry claims FAILED -> PUBLISHING and lands
    h.scheduler.poll_once().await.unwrap();
    let published = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert_eq!(published.retry_count, 1);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 2);
}

#[tokio::test]
async fn permanent_failure_does_not_retry() {
    let adapter = MockAdapter::always_failing(
        PlatformKind::Mastodon,
        PlatformError::Rejected("duplicate content".to_string()),
        10,
    );
    let h = harness(adapter).await;
    let post = seeded_post(&h, "rejected").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    h.scheduler.poll_once().await.unwrap();

    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    // Permanent rejection: no requeue, single adapter call, failure fanout
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 1);
    assert_eq!(
        h.db.count_notifications_for_user("owner-1").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn retry_budget_exhausts_at_cap() {
    let adapter = MockAdapter::always_failing(
        PlatformKind::Mastodon,
        PlatformError::Network("still down".to_string()),
        10,
    );
    let h = harness(adapter).await;
    let post = seeded_post(&h, "doomed").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();

    // Three attempts total; the third exhausts the budget
    for _ in 0..3 {
        h.scheduler.poll_once().await.unwrap();
    }

    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 3);

    // Further polls find no work
    assert_eq!(h.scheduler.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_returns_post_to_draft() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "changed my mind").await;

    h.scheduler.schedule(&post.id, now_ts() + 3600).await.unwrap();
    assert!(h.scheduler.cancel(&post.id).await.unwrap());

    let loaded = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PostStatus::Draft);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());

    // A second cancel has nothing to do
    assert!(!h.scheduler.cancel(&post.id).await.unwrap());
}

#[tokio::test]
async fn published_post_cannot_be_rescheduled() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "done already").await;

    h.scheduler.publish_now(&post.id).await.unwrap();
    let result = h.scheduler.schedule(&post.id, now_ts() + 100).await;
    assert!(result.is_err());

    let loaded = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PostStatus::Published);
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_publish() {
    let h = harness(MockAdapter::success(PlatformKind::Twitter)).await;

    let account = SocialAccount::new(
        "owner-2".to_string(),
        PlatformKind::Twitter,
        // Expires in 60s, inside the 300s refresh buffer
        Credentials::expiring("stale".to_string(), "refresh".to_string(), now_ts() + 60),
    );
    h.db.create_account(&account, &h.vault).await.unwrap();

    let post = Post::new("owner-2".to_string(), account.id.clone(), "fresh token".to_string());
    h.db.create_post(&post).await.unwrap();

    let published = h.scheduler.publish_now(&post.id).await.unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert_eq!(h.adapter.refresh_call_count(), 1);

    // Rotated credentials were persisted
    let stored = h.db.get_account(&account.id, &h.vault).await.unwrap().unwrap();
    assert_eq!(stored.credentials.access_token, "stale-refreshed");
}

#[tokio::test]
async fn failed_refresh_fails_post_and_deactivates_account() {
    let adapter = MockAdapter::refresh_failure(
        PlatformKind::Twitter,
        PlatformError::Auth("refresh token revoked".to_string()),
    );
    let h = harness(adapter).await;

    let account = SocialAccount::new(
        "owner-3".to_string(),
        PlatformKind::Twitter,
        Credentials::expiring("stale".to_string(), "bad".to_string(), now_ts() + 10),
    );
    h.db.create_account(&account, &h.vault).await.unwrap();

    let post = Post::new("owner-3".to_string(), account.id.clone(), "no auth".to_string());
    h.db.create_post(&post).await.unwrap();

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    h.scheduler.poll_once().await.unwrap();

    // Auth failure is permanent: no retry, account deactivated
    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 0);

    let stored = h.db.get_account(&account.id, &h.vault).await.unwrap().unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
async fn publish_time_credential_rejection_deactivates_account() {
    // A non-expiring token never trips the refresh buffer, so a
    // revocation only surfaces as a 401 from the platform itself.
    let adapter = MockAdapter::new(MockConfig {
        kind: PlatformKind::Mastodon,
        publish_script: vec![PlatformError::Auth("token revoked".to_string()); 10],
        refresh_error: Some(PlatformError::NotSupported("no refresh flow".to_string())),
        ..Default::default()
    });
    let h = harness(adapter).await;
    let post = seeded_post(&h, "revoked token").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    h.scheduler.poll_once().await.unwrap();

    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 1);

    // The rejection forced a refresh attempt; with no refresh flow the
    // account is pulled out of rotation rather than left to fail again
    assert_eq!(h.adapter.refresh_call_count(), 1);
    let stored = h
        .db
        .get_account(&failed.account_id, &h.vault)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
async fn two_transient_failures_then_success() {
    let adapter = MockAdapter::failing_then_ok(
        PlatformKind::Mastodon,
        vec![
            PlatformError::Network("connection reset".to_string()),
            PlatformError::Timeout("read timed out".to_string()),
        ],
    );
    let h = harness(adapter).await;
    let post = seeded_post(&h, "third time lucky").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();

    h.scheduler.poll_once().await.unwrap();
    h.scheduler.poll_once().await.unwrap();
    let still_failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(still_failed.status, PostStatus::Failed);
    assert_eq!(still_failed.retry_count, 2);
    assert!(h.db.get_job(&post.id).await.unwrap().is_some());

    h.scheduler.poll_once().await.unwrap();
    let published = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert_eq!(published.retry_count, 2);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 3);
}

#[tokio::test]
async fn concurrent_claims_publish_exactly_once() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "exactly once").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();

    // Two pollers racing over the same queue
    let (a, b) = tokio::join!(h.scheduler.poll_once(), h.scheduler.poll_once());
    assert_eq!(a.unwrap() + b.unwrap(), 1);

    let published = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(published.status, PostStatus::Published);
    assert_eq!(h.adapter.publish_call_count(), 1);
}

#[tokio::test]
async fn content_validation_fails_without_retry() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "   ").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    h.scheduler.poll_once().await.unwrap();

    let failed = h.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Failed);
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    // Validation rejected the post before any publish was recorded
    assert!(h.adapter.published_content().is_empty());
}

#[tokio::test]
async fn deleting_post_drops_stale_job_on_next_poll() {
    let h = harness(MockAdapter::success(PlatformKind::Mastodon)).await;
    let post = seeded_post(&h, "gone").await;

    h.scheduler.schedule(&post.id, now_ts() - 1).await.unwrap();
    // Post deleted out from under the queue (allowed while SCHEDULED)
    assert!(h.db.delete_post(&post.id).await.unwrap());

    h.scheduler.poll_once().await.unwrap();
    assert!(h.db.get_job(&post.id).await.unwrap().is_none());
    assert_eq!(h.adapter.publish_call_count(), 0);
}
