//! Core types for Syndicast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a post.
///
/// Legal transitions: Draft -> Scheduled -> Publishing -> Published | Failed,
/// and Failed -> Publishing while the retry cap has not been reached.
/// Published is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "scheduled" => Some(PostStatus::Scheduled),
            "publishing" => Some(PostStatus::Publishing),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// Whether content and media may still be edited in this status.
    pub fn is_editable(&self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Scheduled)
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of supported platforms.
///
/// The adapter registry maps each variant to an adapter at startup; there is
/// no runtime string-keyed module loading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Mastodon,
    Twitter,
    Instagram,
    Threads,
    Facebook,
    LinkedIn,
    Bluesky,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 7] = [
        PlatformKind::Mastodon,
        PlatformKind::Twitter,
        PlatformKind::Instagram,
        PlatformKind::Threads,
        PlatformKind::Facebook,
        PlatformKind::LinkedIn,
        PlatformKind::Bluesky,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Mastodon => "mastodon",
            PlatformKind::Twitter => "twitter",
            PlatformKind::Instagram => "instagram",
            PlatformKind::Threads => "threads",
            PlatformKind::Facebook => "facebook",
            PlatformKind::LinkedIn => "linkedin",
            PlatformKind::Bluesky => "bluesky",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mastodon" => Some(PlatformKind::Mastodon),
            "twitter" | "x" => Some(PlatformKind::Twitter),
            "instagram" => Some(PlatformKind::Instagram),
            "threads" => Some(PlatformKind::Threads),
            "facebook" => Some(PlatformKind::Facebook),
            "linkedin" => Some(PlatformKind::LinkedIn),
            "bluesky" => Some(PlatformKind::Bluesky),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of content a post carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "video" => Some(ContentType::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub account_id: String,
    pub content: String,
    pub content_type: ContentType,
    /// Ready-to-use media URLs produced upstream by the media service.
    pub media_urls: Vec<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: i64,
}

impl Post {
    pub fn new(owner_id: String, account_id: String, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            account_id,
            content,
            content_type: ContentType::Text,
            media_urls: Vec::new(),
            status: PostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            platform_post_id: None,
            platform_post_url: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now().timestamp(),
        }
    }

    /// Deterministic durable-queue job id for this post.
    ///
    /// One post maps to exactly one job id, which makes scheduling an upsert
    /// rather than an insert that could duplicate.
    pub fn job_id(&self) -> String {
        job_id_for(&self.id)
    }
}

/// Job id for a post id: `"post-" + post_id`.
pub fn job_id_for(post_id: &str) -> String {
    format!("post-{}", post_id)
}

/// OAuth credential tuple for a connected account.
///
/// Stored encrypted at rest; decrypted only at the persistence boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp after which the access token is stale. Absent means
    /// the token does not expire.
    pub expires_at: Option<i64>,
}

impl Credentials {
    pub fn non_expiring(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn expiring(access_token: String, refresh_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token: Some(refresh_token),
            expires_at: Some(expires_at),
        }
    }

    /// Whether the token is within `buffer_secs` of expiry at `now`.
    pub fn needs_refresh(&self, now: i64, buffer_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now + buffer_secs >= expires_at,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: String,
    pub owner_id: String,
    pub platform: PlatformKind,
    pub credentials: Credentials,
    pub is_active: bool,
    pub display_name: Option<String>,
    pub created_at: i64,
}

impl SocialAccount {
    pub fn new(owner_id: String, platform: PlatformKind, credentials: Credentials) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            platform,
            credentials,
            is_active: true,
            display_name: None,
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Result of a successful publish call against a platform API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub external_id: String,
    pub external_url: Option<String>,
}

/// Parameters for sending a direct message through a platform.
#[derive(Debug, Clone)]
pub struct MessageParams {
    pub recipient_id: String,
    pub text: String,
}

/// Result of a successful direct-message send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub external_message_id: String,
    pub conversation_id: Option<String>,
}

/// Engagement metrics for a published post, as far as the platform
/// exposes them. Absent fields are metrics the platform does not report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostAnalytics {
    pub impressions: Option<i64>,
    pub likes: Option<i64>,
    pub shares: Option<i64>,
    pub comments: Option<i64>,
}

/// A pending entry in the durable job queue.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// `"post-" + post_id`
    pub id: String,
    pub post_id: String,
    pub due_at: i64,
    pub attempts: i64,
    /// While set and in the future, the job is claimed by a worker.
    pub claimed_until: Option<i64>,
    pub created_at: i64,
}

/// Kind of terminal-outcome notification emitted by the fanout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PostPublished,
    PostFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PostPublished => "post_published",
            NotificationKind::PostFailed => "post_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub target_user_id: String,
    pub payload: serde_json::Value,
    pub high_priority: bool,
}

/// Timestamp helper used across the crate.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Format a Unix timestamp for human-readable CLI output.
pub fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
