//! Bluesky platform adapter
//!
//! Speaks XRPC against the AT Protocol PDS. Session credentials map
//! directly onto the credential tuple: `access_token` holds the access
//! JWT, `refresh_token` the refresh JWT. Access JWTs last roughly two
//! hours, so refresh runs through `com.atproto.server.refreshSession`
//! with the refresh JWT as the bearer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{Credentials, PlatformKind, Post, PublishReceipt};

const PDS_BASE: &str = "https://bsky.social/xrpc";

/// Conservative lifetime assumed for a freshly minted access JWT.
const ACCESS_JWT_TTL_SECS: i64 = 7200;

pub struct BlueskyAdapter {
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_jwt: String,
    refresh_jwt: String,
}

#[derive(Deserialize)]
struct GetSessionResponse {
    did: String,
    handle: String,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

impl BlueskyAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn get_session(&self, access_jwt: &str) -> Result<GetSessionResponse, PlatformError> {
        let response = self
            .client
            .get(format!("{}/com.atproto.server.getSession", PDS_BASE))
            .bearer_auth(access_jwt)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("getSession parse error: {}", e)))
    }
}

impl Default for BlueskyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for BlueskyAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Bluesky
    }

    fn character_limit(&self) -> Option<usize> {
        Some(300)
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let refresh_jwt = credentials.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Auth("bluesky account has no refresh JWT".to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/com.atproto.server.refreshSession", PDS_BASE))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("refreshSession parse error: {}", e)))?;

        Ok(Credentials {
            access_token: session.access_jwt,
            refresh_token: Some(session.refresh_jwt),
            expires_at: Some(chrono::Utc::now().timestamp() + ACCESS_JWT_TTL_SECS),
        })
    }

    async fn publish_post(
        &self,
        credentials: &Credentials,
        post: &Post,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate_content(post)?;

        let session = self.get_session(&credentials.access_token).await?;
        let created_at = chrono::Utc::now().to_rfc3339();

        let response = self
            .client
            .post(format!("{}/com.atproto.repo.createRecord", PDS_BASE))
            .bearer_auth(&credentials.access_token)
            .json(&json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": post.content,
                    "createdAt": created_at
                }
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let record: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("createRecord parse error: {}", e)))?;

        // at://did:plc:xyz/app.bsky.feed.post/rkey -> web URL via the rkey
        let external_url = record
            .uri
            .rsplit('/')
            .next()
            .map(|rkey| format!("https://bsky.app/profile/{}/post/{}", session.handle, rkey));

        Ok(PublishReceipt {
            external_id: record.uri,
            external_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_requires_refresh_jwt() {
        let adapter = BlueskyAdapter::new();
        let creds = Credentials::non_expiring("access-jwt".to_string());
        assert!(matches!(
            adapter.refresh_token(&creds).await,
            Err(PlatformError::Auth(_))
        ));
    }

    #[test]
    fn test_character_limit() {
        let adapter = BlueskyAdapter::new();
        let post = Post::new("o".to_string(), "a".to_string(), "y".repeat(301));
        assert!(matches!(
            adapter.validate_content(&post),
            Err(PlatformError::Validation(_))
        ));
    }
}
