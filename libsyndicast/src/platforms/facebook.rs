//! Facebook platform adapter
//!
//! Posts to the page feed (text) or photos edge (image) of the account
//! behind the token. Token refresh is the long-lived exchange, which
//! requires the app's client id and secret.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OAuthAppConfig;
use crate::error::PlatformError;
use crate::platforms::{classify_status, classify_transport, PlatformAdapter};
use crate::types::{Credentials, PlatformKind, Post, PublishReceipt};

const API_BASE: &str = "https://graph.facebook.com/v21.0";

pub struct FacebookAdapter {
    config: Option<OAuthAppConfig>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct FeedResponse {
    id: String,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl FacebookAdapter {
    pub fn new(config: Option<OAuthAppConfig>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn app(&self) -> Result<&OAuthAppConfig, PlatformError> {
        self.config.as_ref().ok_or_else(|| {
            PlatformError::Auth("facebook app credentials not configured".to_string())
        })
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    async fn refresh_token(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, PlatformError> {
        let app = self.app()?;

        let response = self
            .client
            .get(format!("{}/oauth/access_token", API_BASE))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app.client_id.as_str()),
                ("client_secret", app.client_secret.as_str()),
                ("fb_exchange_token", credentials.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let token: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("exchange parse error: {}", e)))?;

        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: None,
            // Exchange responses without expires_in are never-expiring
            // page tokens
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        })
    }

    async fn publish_post(
        &self,
        credentials: &Credentials,
        post: &Post,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate_content(post)?;

        let token = credentials.access_token.as_str();
        let response = match post.media_urls.first() {
            Some(url) => self
                .client
                .post(format!("{}/me/photos", API_BASE))
                .form(&[
                    ("url", url.as_str()),
                    ("caption", post.content.as_str()),
                    ("access_token", token),
                ])
                .send()
                .await
                .map_err(classify_transport)?,
            None => self
                .client
                .post(format!("{}/me/feed", API_BASE))
                .form(&[("message", post.content.as_str()), ("access_token", token)])
                .send()
                .await
                .map_err(classify_transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let feed: FeedResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(format!("feed response parse error: {}", e)))?;

        let external_url = format!("https://www.facebook.com/{}", feed.id);
        Ok(PublishReceipt {
            external_id: feed.id,
            external_url: Some(external_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_without_app_config_is_auth_error() {
        let adapter = FacebookAdapter::new(None);
        let creds = Credentials::non_expiring("t".to_string());
        assert!(matches!(
            adapter.refresh_token(&creds).await,
            Err(PlatformError::Auth(_))
        ));
    }
}
