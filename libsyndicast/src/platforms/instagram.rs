//! Instagram platform adapter
//!
//! Publishing on Instagram is a two-phase protocol: create a media
//! container, wait for the platform to ingest the media, then publish
//! the container. Ingestion is asynchronous on Instagram's side, so the
//! adapter polls the container status with a bounded wait before giving
//! up with a retryable timeout.
//!
//! Long-lived Instagram tokens refresh through a dedicated endpoint that
//! needs no client secret, only the token itself.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{Credentials, PlatformKind, Post, PublishReceipt};

const API_BASE: &str = "https://graph.instagram.com/v21.0";

/// Total time to wait for media ingestion before declaring a timeout.
const CONTAINER_WAIT: Duration = Duration::from_secs(60);
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct InstagramAdapter {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct ContainerStatus {
    status_code: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl InstagramAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the Instagram user id behind the token.
    async fn resolve_user_id(&self, access_token: &str) -> Result<String, PlatformError> {
        let response = self
            .client
            .get(format!("{}/me", API_BASE))
            .query(&[("fields", "id"), ("access_token", access_token)])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let me: IdResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("user lookup parse error: {}", e)))?;
        Ok(me.id)
    }

    async fn create_container(
        &self,
        access_token: &str,
        user_id: &str,
        post: &Post,
    ) -> Result<String, PlatformError> {
        let media_url = post.media_urls.first().ok_or_else(|| {
            PlatformError::Validation("instagram posts require at least one media url".to_string())
        })?;

        let mut params = vec![
            ("caption", post.content.as_str()),
            ("access_token", access_token),
        ];
        let is_video = matches!(post.content_type, crate::types::ContentType::Video);
        if is_video {
            params.push(("media_type", "REELS"));
            params.push(("video_url", media_url.as_str()));
        } else {
            params.push(("image_url", media_url.as_str()));
        }

        let response = self
            .client
            .post(format!("{}/{}/media", API_BASE, user_id))
            .form(&params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let container: IdResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("container parse error: {}", e)))?;
        Ok(container.id)
    }

    /// Poll the container until Instagram reports it ready. Bounded: if
    /// ingestion does not finish inside the window, the attempt fails
    /// with a retryable timeout and the whole publish is retried later.
    async fn wait_for_container(
        &self,
        access_token: &str,
        container_id: &str,
    ) -> Result<(), PlatformError> {
        let deadline = tokio::time::Instant::now() + CONTAINER_WAIT;

        loop {
            let response = self
                .client
                .get(format!("{}/{}", API_BASE, container_id))
                .query(&[("fields", "status_code"), ("access_token", access_token)])
                .send()
                .await
                .map_err(classify_transport)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }

            let container: ContainerStatus = response
                .json()
                .await
                .map_err(|e| PlatformError::Network(format!("status parse error: {}", e)))?;

            match container.status_code.as_str() {
                "FINISHED" => return Ok(()),
                "ERROR" => {
                    return Err(PlatformError::Rejected(
                        "instagram rejected the media container".to_string(),
                    ))
                }
                // IN_PROGRESS / PUBLISHED / anything transitional: keep waiting
                _ => {}
            }

            if tokio::time::Instant::now() + CONTAINER_POLL_INTERVAL > deadline {
                return Err(PlatformError::Timeout(format!(
                    "media container {} not ready after {}s",
                    container_id,
                    CONTAINER_WAIT.as_secs()
                )));
            }
            tokio::time::sleep(CONTAINER_POLL_INTERVAL).await;
        }
    }
}

impl Default for InstagramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    fn character_limit(&self) -> Option<usize> {
        // Caption limit
        Some(2200)
    }

    fn validate_content(&self, post: &Post) -> Result<(), PlatformError> {
        if post.media_urls.is_empty() {
            return Err(PlatformError::Validation(
                "instagram posts require at least one media url".to_string(),
            ));
        }
        if let Some(limit) = self.character_limit() {
            let count = post.content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "caption is {} characters, limit is {}",
                    count, limit
                )));
            }
        }
        Ok(())
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let response = self
            .client
            .get("https://graph.instagram.com/refresh_access_token")
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", credentials.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let token: RefreshResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("refresh parse error: {}", e)))?;

        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: None,
            expires_at: Some(chrono::Utc::now().timestamp() + token.expires_in),
        })
    }

    async fn publish_post(
        &self,
        credentials: &Credentials,
        post: &Post,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate_content(post)?;

        let token = credentials.access_token.as_str();
        let user_id = self.resolve_user_id(token).await?;
        let container_id = self.create_container(token, &user_id, post).await?;
        self.wait_for_container(token, &container_id).await?;

        let response = self
            .client
            .post(format!("{}/{}/media_publish", API_BASE, user_id))
            .form(&[("creation_id", container_id.as_str()), ("access_token", token)])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let published: IdResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("publish parse error: {}", e)))?;

        Ok(PublishReceipt {
            external_id: published.id,
            external_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_is_required() {
        let adapter = InstagramAdapter::new();
        let post = Post::new("o".to_string(), "a".to_string(), "caption".to_string());
        assert!(matches!(
            adapter.validate_content(&post),
            Err(PlatformError::Validation(_))
        ));
    }

    #[test]
    fn test_caption_limit() {
        let adapter = InstagramAdapter::new();
        let mut post = Post::new("o".to_string(), "a".to_string(), "x".repeat(2201));
        post.media_urls = vec!["https://cdn.example/a.jpg".to_string()];
        assert!(matches!(
            adapter.validate_content(&post),
            Err(PlatformError::Validation(_))
        ));

        post.content = "fine".to_string();
        assert!(adapter.validate_content(&post).is_ok());
    }
}
