//! Threads platform adapter
//!
//! Same container-then-publish protocol as Instagram, but text-only
//! posts are allowed and the container for text is ready immediately,
//! so no ingestion poll is needed. Long-lived tokens refresh through
//! the `th_refresh_token` grant.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{Credentials, PlatformKind, Post, PublishReceipt};

const API_BASE: &str = "https://graph.threads.net/v1.0";

pub struct ThreadsAdapter {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl ThreadsAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

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
}

impl Default for ThreadsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for ThreadsAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Threads
    }

    fn character_limit(&self) -> Option<usize> {
        Some(500)
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let response = self
            .client
            .get("https://graph.threads.net/refresh_access_token")
            .query(&[
                ("grant_type", "th_refresh_token"),
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

        let mut params = vec![("text", post.content.as_str()), ("access_token", token)];
        match post.media_urls.first() {
            Some(url) if matches!(post.content_type, crate::types::ContentType::Video) => {
                params.push(("media_type", "VIDEO"));
                params.push(("video_url", url.as_str()));
            }
            Some(url) => {
                params.push(("media_type", "IMAGE"));
                params.push(("image_url", url.as_str()));
            }
            None => {
                params.push(("media_type", "TEXT"));
            }
        }

        let response = self
            .client
            .post(format!("{}/{}/threads", API_BASE, user_id))
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

        let response = self
            .client
            .post(format!("{}/{}/threads_publish", API_BASE, user_id))
            .form(&[("creation_id", container.id.as_str()), ("access_token", token)])
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
