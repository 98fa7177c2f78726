//! Twitter/X platform adapter
//!
//! Talks to the v2 API directly over reqwest. Twitter OAuth2 access
//! tokens are short-lived (around two hours), so this adapter implements
//! the full refresh flow: the confidential client exchanges the stored
//! refresh token for a new pair, authenticated with HTTP Basic using the
//! app's client id and secret.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthAppConfig;
use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{
    Credentials, MessageParams, MessageReceipt, PlatformKind, Post, PostAnalytics, PublishReceipt,
};

const API_BASE: &str = "https://api.x.com/2";
const TOKEN_URL: &str = "https://api.x.com/2/oauth2/token";

pub struct TwitterAdapter {
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
struct TweetData {
    id: String,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct DmData {
    dm_event_id: String,
    dm_conversation_id: Option<String>,
}

#[derive(Deserialize)]
struct DmResponse {
    data: DmData,
}

#[derive(Deserialize)]
struct PublicMetrics {
    impression_count: Option<i64>,
    like_count: Option<i64>,
    retweet_count: Option<i64>,
    reply_count: Option<i64>,
}

#[derive(Deserialize)]
struct TweetLookupData {
    public_metrics: Option<PublicMetrics>,
}

#[derive(Deserialize)]
struct TweetLookupResponse {
    data: TweetLookupData,
}

impl TwitterAdapter {
    pub fn new(config: Option<OAuthAppConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn app(&self) -> Result<&OAuthAppConfig, PlatformError> {
        self.config
            .as_ref()
            .ok_or_else(|| PlatformError::Auth("twitter app credentials not configured".to_string()))
    }

    fn basic_auth_header(&self) -> Result<String, PlatformError> {
        let app = self.app()?;
        let pair = format!("{}:{}", app.client_id, app.client_secret);
        Ok(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(pair)
        ))
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Twitter
    }

    fn character_limit(&self) -> Option<usize> {
        Some(280)
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Auth("twitter account has no refresh token".to_string())
        })?;

        let response = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", self.basic_auth_header()?)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
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
            .map_err(|e| PlatformError::Network(format!("token response parse error: {}", e)))?;

        Ok(Credentials {
            access_token: token.access_token,
            // Twitter rotates refresh tokens; if one is not returned,
            // the old one stays valid
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

        let response = self
            .client
            .post(format!("{}/tweets", API_BASE))
            .bearer_auth(&credentials.access_token)
            .json(&json!({ "text": post.content }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let tweet: TweetResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("tweet response parse error: {}", e)))?;

        let external_url = format!("https://x.com/i/status/{}", tweet.data.id);
        Ok(PublishReceipt {
            external_id: tweet.data.id,
            external_url: Some(external_url),
        })
    }

    async fn send_message(
        &self,
        credentials: &Credentials,
        params: &MessageParams,
    ) -> Result<MessageReceipt, PlatformError> {
        let response = self
            .client
            .post(format!(
                "{}/dm_conversations/with/{}/messages",
                API_BASE, params.recipient_id
            ))
            .bearer_auth(&credentials.access_token)
            .json(&json!({ "text": params.text }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let dm: DmResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("dm response parse error: {}", e)))?;

        Ok(MessageReceipt {
            external_message_id: dm.data.dm_event_id,
            conversation_id: dm.data.dm_conversation_id,
        })
    }

    async fn get_analytics(
        &self,
        credentials: &Credentials,
        external_post_id: &str,
    ) -> Result<PostAnalytics, PlatformError> {
        let response = self
            .client
            .get(format!("{}/tweets/{}", API_BASE, external_post_id))
            .query(&[("tweet.fields", "public_metrics")])
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let lookup: TweetLookupResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("tweet lookup parse error: {}", e)))?;

        let metrics = lookup.data.public_metrics.unwrap_or(PublicMetrics {
            impression_count: None,
            like_count: None,
            retweet_count: None,
            reply_count: None,
        });

        Ok(PostAnalytics {
            impressions: metrics.impression_count,
            likes: metrics.like_count,
            shares: metrics.retweet_count,
            comments: metrics.reply_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header_encodes_client_pair() {
        let adapter = TwitterAdapter::new(Some(OAuthAppConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }));
        let header = adapter.basic_auth_header().unwrap();
        // base64("id:secret")
        assert_eq!(header, "Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn test_missing_app_config_is_auth_error() {
        let adapter = TwitterAdapter::new(None);
        assert!(matches!(adapter.app(), Err(PlatformError::Auth(_))));
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let adapter = TwitterAdapter::new(Some(OAuthAppConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }));
        let creds = Credentials::non_expiring("access-only".to_string());
        let result = adapter.refresh_token(&creds).await;
        assert!(matches!(result, Err(PlatformError::Auth(_))));
    }
}
