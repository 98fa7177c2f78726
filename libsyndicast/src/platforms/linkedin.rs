//! LinkedIn platform adapter
//!
//! Text posts go straight to the ugcPosts endpoint. Image posts need the
//! three-step asset flow first: register an upload slot, upload the
//! image bytes to the returned URL, then reference the asset URN from
//! the post. Media arrives here as a URL, so the bytes are fetched from
//! it before the upload.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{Credentials, PlatformKind, Post, PublishReceipt};

const API_BASE: &str = "https://api.linkedin.com/v2";
const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";

pub struct LinkedInAdapter {
    config: Option<OAuthAppConfig>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
}

#[derive(Deserialize)]
struct UgcResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUploadValue {
    upload_mechanism: serde_json::Value,
    asset: String,
}

#[derive(Deserialize)]
struct RegisterUploadResponse {
    value: RegisterUploadValue,
}

impl LinkedInAdapter {
    pub fn new(config: Option<OAuthAppConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn app(&self) -> Result<&OAuthAppConfig, PlatformError> {
        self.config.as_ref().ok_or_else(|| {
            PlatformError::Auth("linkedin app credentials not configured".to_string())
        })
    }

    /// Person URN of the token's owner, needed as the post author.
    async fn resolve_author(&self, access_token: &str) -> Result<String, PlatformError> {
        let response = self
            .client
            .get("https://api.linkedin.com/v2/userinfo")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("userinfo parse error: {}", e)))?;
        Ok(format!("urn:li:person:{}", info.sub))
    }

    /// Register an upload, push the image bytes, return the asset URN.
    async fn upload_image(
        &self,
        access_token: &str,
        author: &str,
        media_url: &str,
    ) -> Result<String, PlatformError> {
        let register = self
            .client
            .post(format!("{}/assets?action=registerUpload", API_BASE))
            .bearer_auth(access_token)
            .json(&json!({
                "registerUploadRequest": {
                    "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                    "owner": author,
                    "serviceRelationships": [{
                        "relationshipType": "OWNER",
                        "identifier": "urn:li:userGeneratedContent"
                    }]
                }
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = register.status();
        if !status.is_success() {
            let body = register.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let registered: RegisterUploadResponse = register
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("registerUpload parse error: {}", e)))?;

        let upload_url = registered.value.upload_mechanism
            ["com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest"]["uploadUrl"]
            .as_str()
            .ok_or_else(|| {
                PlatformError::Network("registerUpload response missing uploadUrl".to_string())
            })?
            .to_string();

        let media = self
            .client
            .get(media_url)
            .send()
            .await
            .map_err(classify_transport)?;
        let media_status = media.status();
        if !media_status.is_success() {
            return Err(PlatformError::Network(format!(
                "failed to fetch media from {}: HTTP {}",
                media_url,
                media_status.as_u16()
            )));
        }
        let bytes = media.bytes().await.map_err(classify_transport)?;

        let upload = self
            .client
            .put(&upload_url)
            .bearer_auth(access_token)
            .body(bytes)
            .send()
            .await
            .map_err(classify_transport)?;

        let upload_status = upload.status();
        if !upload_status.is_success() {
            let body = upload.text().await.unwrap_or_default();
            return Err(classify_status(upload_status, &body));
        }

        Ok(registered.value.asset)
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::LinkedIn
    }

    fn character_limit(&self) -> Option<usize> {
        Some(3000)
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let app = self.app()?;
        let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Auth("linkedin account has no refresh token".to_string())
        })?;

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", app.client_id.as_str()),
                ("client_secret", app.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("token parse error: {}", e)))?;

        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .or_else(|| credentials.refresh_token.clone()),
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
        let author = self.resolve_author(token).await?;

        let share_content = match post.media_urls.first() {
            Some(media_url) => {
                let asset = self.upload_image(token, &author, media_url).await?;
                json!({
                    "shareCommentary": { "text": post.content },
                    "shareMediaCategory": "IMAGE",
                    "media": [{ "status": "READY", "media": asset }]
                })
            }
            None => json!({
                "shareCommentary": { "text": post.content },
                "shareMediaCategory": "NONE"
            }),
        };

        let response = self
            .client
            .post(format!("{}/ugcPosts", API_BASE))
            .bearer_auth(token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&json!({
                "author": author,
                "lifecycleState": "PUBLISHED",
                "specificContent": {
                    "com.linkedin.ugc.ShareContent": share_content
                },
                "visibility": {
                    "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
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

        let ugc: UgcResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("ugcPost parse error: {}", e)))?;

        let external_url = format!("https://www.linkedin.com/feed/update/{}", ugc.id);
        Ok(PublishReceipt {
            external_id: ugc.id,
            external_url: Some(external_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let adapter = LinkedInAdapter::new(Some(OAuthAppConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }));
        let creds = Credentials::non_expiring("only-access".to_string());
        assert!(matches!(
            adapter.refresh_token(&creds).await,
            Err(PlatformError::Auth(_))
        ));
    }

    #[test]
    fn test_character_limit_enforced() {
        let adapter = LinkedInAdapter::new(None);
        let post = Post::new("o".to_string(), "a".to_string(), "x".repeat(3001));
        assert!(matches!(
            adapter.validate_content(&post),
            Err(PlatformError::Validation(_))
        ));
    }
}
