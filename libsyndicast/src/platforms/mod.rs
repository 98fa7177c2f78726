//! Platform adapter abstraction and implementations
//!
//! Each supported platform implements [`PlatformAdapter`], the unified
//! contract the scheduler publishes through. Adapters are stateless:
//! credentials are passed per call, already refreshed by the token
//! lifecycle layer. Every failure an adapter returns is a normalized
//! [`PlatformError`], never a raw HTTP or transport error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{
    Credentials, MessageParams, MessageReceipt, PlatformKind, Post, PostAnalytics, PublishReceipt,
};

pub mod bluesky;
pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod mastodon;
pub mod threads;
pub mod twitter;

// Mock adapter is available for all builds (not just tests) to support
// integration tests
pub mod mock;

/// Unified contract for publishing through a social platform.
///
/// `publish_post` is the only capability every adapter must provide.
/// Token refresh, direct messages, and analytics have defaults that
/// return `NotSupported`, which callers treat as a normal answer for
/// platforms lacking the capability rather than a failure to handle.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter speaks to.
    fn kind(&self) -> PlatformKind;

    /// Hard character limit for post content, if the platform has one.
    fn character_limit(&self) -> Option<usize> {
        None
    }

    /// Validate content before any network call is made.
    fn validate_content(&self, post: &Post) -> std::result::Result<(), PlatformError> {
        if post.content.trim().is_empty() && post.media_urls.is_empty() {
            return Err(PlatformError::Validation(
                "post has no content and no media".to_string(),
            ));
        }
        if let Some(limit) = self.character_limit() {
            let count = post.content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "content is {} characters, limit is {}",
                    count, limit
                )));
            }
        }
        Ok(())
    }

    /// Exchange a refresh token for a fresh credential tuple.
    async fn refresh_token(
        &self,
        _credentials: &Credentials,
    ) -> std::result::Result<Credentials, PlatformError> {
        Err(PlatformError::NotSupported(format!(
            "{} does not support token refresh",
            self.kind()
        )))
    }

    /// Publish a post and return the platform's receipt for it.
    async fn publish_post(
        &self,
        credentials: &Credentials,
        post: &Post,
    ) -> std::result::Result<PublishReceipt, PlatformError>;

    /// Send a direct message.
    async fn send_message(
        &self,
        _credentials: &Credentials,
        _params: &MessageParams,
    ) -> std::result::Result<MessageReceipt, PlatformError> {
        Err(PlatformError::NotSupported(format!(
            "{} does not support direct messages",
            self.kind()
        )))
    }

    /// Fetch engagement metrics for a previously published post.
    async fn get_analytics(
        &self,
        _credentials: &Credentials,
        _external_post_id: &str,
    ) -> std::result::Result<PostAnalytics, PlatformError> {
        Err(PlatformError::NotSupported(format!(
            "{} does not expose analytics",
            self.kind()
        )))
    }
}

/// Static registry mapping each [`PlatformKind`] to its adapter.
///
/// Built once at startup from configuration; the platform set is closed,
/// so lookup by kind always succeeds. Tests swap individual entries for
/// mocks with [`AdapterRegistry::with_adapter`].
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<PlatformKind, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    /// Build the full registry from configuration. Every variant of
    /// [`PlatformKind`] gets an adapter; a platform without the relevant
    /// app config gets one that fails with `Auth` on first use rather
    /// than a missing entry.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut adapters: HashMap<PlatformKind, Arc<dyn PlatformAdapter>> = HashMap::new();

        for kind in PlatformKind::ALL {
            let adapter: Arc<dyn PlatformAdapter> = match kind {
                PlatformKind::Mastodon => {
                    Arc::new(mastodon::MastodonAdapter::new(config.mastodon.clone()))
                }
                PlatformKind::Twitter => {
                    Arc::new(twitter::TwitterAdapter::new(config.twitter.clone()))
                }
                PlatformKind::Instagram => Arc::new(instagram::InstagramAdapter::new()),
                PlatformKind::Threads => Arc::new(threads::ThreadsAdapter::new()),
                PlatformKind::Facebook => {
                    Arc::new(facebook::FacebookAdapter::new(config.facebook.clone()))
                }
                PlatformKind::LinkedIn => {
                    Arc::new(linkedin::LinkedInAdapter::new(config.linkedin.clone()))
                }
                PlatformKind::Bluesky => Arc::new(bluesky::BlueskyAdapter::new()),
            };
            adapters.insert(kind, adapter);
        }

        Ok(Self { adapters })
    }

    /// Replace one entry, keeping the rest. Used by tests to route a
    /// platform through the mock adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Registry routing every platform through a single adapter. Test
    /// convenience for exercising the scheduler without app config.
    pub fn all_mock(adapter: Arc<dyn PlatformAdapter>) -> Self {
        let mut adapters: HashMap<PlatformKind, Arc<dyn PlatformAdapter>> = HashMap::new();
        for kind in PlatformKind::ALL {
            adapters.insert(kind, adapter.clone());
        }
        Self { adapters }
    }

    pub fn get(&self, kind: PlatformKind) -> std::result::Result<Arc<dyn PlatformAdapter>, PlatformError> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            PlatformError::NotSupported(format!("no adapter registered for {}", kind))
        })
    }
}

/// Map an HTTP status to the normalized error taxonomy.
///
/// 401/403 are credential problems, 400/422 mean the platform rejected
/// the content, 429 is rate limiting, and everything else (including
/// every 5xx) is treated as a transient network failure.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> PlatformError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body)
    };

    match status.as_u16() {
        401 | 403 => PlatformError::Auth(detail),
        400 | 422 => PlatformError::Rejected(detail),
        429 => PlatformError::RateLimit(detail),
        _ => PlatformError::Network(detail),
    }
}

/// Map a reqwest transport error to the normalized taxonomy.
pub(crate) fn classify_transport(err: reqwest::Error) -> PlatformError {
    if err.is_timeout() {
        PlatformError::Timeout(err.to_string())
    } else {
        PlatformError::Network(err.to_string())
    }
}
