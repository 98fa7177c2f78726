//! Mock platform adapter for testing
//!
//! A configurable adapter that can simulate successes, scripted failure
//! sequences, and latency. Integration tests route any platform kind
//! through it to exercise the scheduler, state machine, and token
//! lifecycle without network access or real credentials.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::PlatformError;
use crate::platforms::PlatformAdapter;
use crate::types::{
    Credentials, MessageParams, MessageReceipt, PlatformKind, Post, PostAnalytics, PublishReceipt,
};

/// Configuration for mock adapter behavior
#[derive(Clone)]
pub struct MockConfig {
    /// Which platform kind the adapter claims to be.
    pub kind: PlatformKind,

    /// Errors returned by successive publish calls, in order. Once the
    /// script runs out, publishing succeeds.
    pub publish_script: Vec<PlatformError>,

    /// Error returned by every refresh call, if any.
    pub refresh_error: Option<PlatformError>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    pub character_limit: Option<usize>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            kind: PlatformKind::Mastodon,
            publish_script: Vec::new(),
            refresh_error: None,
            delay: Duration::from_millis(0),
            character_limit: None,
        }
    }
}

/// Mock adapter for testing
pub struct MockAdapter {
    config: MockConfig,
    publish_calls: Arc<Mutex<usize>>,
    refresh_calls: Arc<Mutex<usize>>,
    published_content: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            publish_calls: Arc::new(Mutex::new(0)),
            refresh_calls: Arc::new(Mutex::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An adapter that always succeeds.
    pub fn success(kind: PlatformKind) -> Self {
        Self::new(MockConfig {
            kind,
            ..Default::default()
        })
    }

    /// An adapter whose first `failures.len()` publish calls fail with
    /// the given errors, then succeed.
    pub fn failing_then_ok(kind: PlatformKind, failures: Vec<PlatformError>) -> Self {
        Self::new(MockConfig {
            kind,
            publish_script: failures,
            ..Default::default()
        })
    }

    /// An adapter that fails every publish with the same error.
    pub fn always_failing(kind: PlatformKind, error: PlatformError, times: usize) -> Self {
        Self::new(MockConfig {
            kind,
            publish_script: vec![error; times],
            ..Default::default()
        })
    }

    /// An adapter whose refresh calls fail.
    pub fn refresh_failure(kind: PlatformKind, error: PlatformError) -> Self {
        Self::new(MockConfig {
            kind,
            refresh_error: Some(error),
            ..Default::default()
        })
    }

    pub fn publish_call_count(&self) -> usize {
        *self.publish_calls.lock().unwrap()
    }

    pub fn refresh_call_count(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }

    pub fn published_content(&self) -> Vec<String> {
        self.published_content.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn kind(&self) -> PlatformKind {
        self.config.kind
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        sleep(self.config.delay).await;
        *self.refresh_calls.lock().unwrap() += 1;

        if let Some(error) = &self.config.refresh_error {
            return Err(error.clone());
        }

        Ok(Credentials {
            access_token: format!("{}-refreshed", credentials.access_token),
            refresh_token: credentials.refresh_token.clone(),
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        })
    }

    async fn publish_post(
        &self,
        _credentials: &Credentials,
        post: &Post,
    ) -> Result<PublishReceipt, PlatformError> {
        sleep(self.config.delay).await;
        self.validate_content(post)?;

        let call_index = {
            let mut calls = self.publish_calls.lock().unwrap();
            let index = *calls;
            *calls += 1;
            index
        };

        if let Some(error) = self.config.publish_script.get(call_index) {
            return Err(error.clone());
        }

        self.published_content
            .lock()
            .unwrap()
            .push(post.content.clone());

        Ok(PublishReceipt {
            external_id: format!("mock-{}-{}", post.id, call_index),
            external_url: Some(format!("https://mock.example/{}", post.id)),
        })
    }

    async fn send_message(
        &self,
        _credentials: &Credentials,
        params: &MessageParams,
    ) -> Result<MessageReceipt, PlatformError> {
        sleep(self.config.delay).await;
        Ok(MessageReceipt {
            external_message_id: format!("mock-dm-{}", params.recipient_id),
            conversation_id: None,
        })
    }

    async fn get_analytics(
        &self,
        _credentials: &Credentials,
        _external_post_id: &str,
    ) -> Result<PostAnalytics, PlatformError> {
        Ok(PostAnalytics {
            impressions: Some(100),
            likes: Some(10),
            shares: Some(2),
            comments: Some(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::non_expiring("token".to_string())
    }

    #[tokio::test]
    async fn test_success_records_content() {
        let adapter = MockAdapter::success(PlatformKind::Twitter);
        let post = Post::new("o".to_string(), "a".to_string(), "hello".to_string());

        let receipt = adapter.publish_post(&creds(), &post).await.unwrap();
        assert!(receipt.external_id.starts_with("mock-"));
        assert_eq!(adapter.publish_call_count(), 1);
        assert_eq!(adapter.published_content(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let adapter = MockAdapter::failing_then_ok(
            PlatformKind::Twitter,
            vec![PlatformError::Network("flaky".to_string())],
        );
        let post = Post::new("o".to_string(), "a".to_string(), "retry me".to_string());

        assert!(adapter.publish_post(&creds(), &post).await.is_err());
        assert!(adapter.publish_post(&creds(), &post).await.is_ok());
        assert_eq!(adapter.publish_call_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let adapter = MockAdapter::success(PlatformKind::Bluesky);
        let refreshed = adapter.refresh_token(&creds()).await.unwrap();
        assert_eq!(refreshed.access_token, "token-refreshed");
        assert_eq!(adapter.refresh_call_count(), 1);
    }
}
