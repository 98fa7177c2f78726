//! Mastodon platform adapter
//!
//! Uses the megalodon library, so anything speaking the Mastodon API
//! (Pleroma, GoToSocial, Akkoma and friends) works through the same
//! adapter. Mastodon OAuth tokens do not expire, so token refresh stays
//! at the trait default of `NotSupported`.

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};

use crate::config::MastodonConfig;
use crate::error::PlatformError;
use crate::platforms::PlatformAdapter;
use crate::types::{Credentials, PlatformKind, Post, PostAnalytics, PublishReceipt};

pub struct MastodonAdapter {
    config: Option<MastodonConfig>,
}

impl MastodonAdapter {
    pub fn new(config: Option<MastodonConfig>) -> Self {
        Self { config }
    }

    fn instance_url(&self) -> Result<String, PlatformError> {
        let config = self.config.as_ref().ok_or_else(|| {
            PlatformError::Auth("mastodon instance not configured".to_string())
        })?;

        let instance = &config.instance;
        if instance.starts_with("http://") || instance.starts_with("https://") {
            Ok(instance.clone())
        } else {
            Ok(format!("https://{}", instance))
        }
    }

    fn client(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn Megalodon + Send + Sync>, PlatformError> {
        megalodon::generator(
            SNS::Mastodon,
            self.instance_url()?,
            Some(credentials.access_token.clone()),
            None,
        )
        .map_err(|e| PlatformError::Auth(format!("failed to create Mastodon client: {:?}", e)))
    }
}

#[async_trait]
impl PlatformAdapter for MastodonAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Mastodon
    }

    fn character_limit(&self) -> Option<usize> {
        // mastodon.social default; instances may allow more
        Some(500)
    }

    async fn publish_post(
        &self,
        credentials: &Credentials,
        post: &Post,
    ) -> Result<PublishReceipt, PlatformError> {
        self.validate_content(post)?;

        let client = self.client(credentials)?;
        let response = client
            .post_status(post.content.clone(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let status_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => {
                return Ok(PublishReceipt {
                    external_id: status.id,
                    external_url: status.url,
                });
            }
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(PublishReceipt {
            external_id: status_id,
            external_url: None,
        })
    }

    async fn get_analytics(
        &self,
        credentials: &Credentials,
        external_post_id: &str,
    ) -> Result<PostAnalytics, PlatformError> {
        let client = self.client(credentials)?;
        let response = client
            .get_status(external_post_id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "get status"))?;

        let status = response.json;
        Ok(PostAnalytics {
            impressions: None,
            likes: Some(status.favourites_count as i64),
            shares: Some(status.reblogs_count as i64),
            comments: Some(status.replies_count as i64),
        })
    }
}

/// Map megalodon errors onto the normalized taxonomy. Megalodon surfaces
/// HTTP status codes inside the error text, so mapping goes through a
/// best-effort status extraction first and falls back to keyword checks.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let detail = format!("Mastodon {} failed: {}", context, error_str);

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Auth(detail),
        Some(422) => PlatformError::Rejected(detail),
        Some(429) => PlatformError::RateLimit(detail),
        Some(_) => PlatformError::Network(detail),
        None => {
            let lower = error_str.to_lowercase();
            if lower.contains("unauthorized")
                || lower.contains("forbidden")
                || lower.contains("authentication")
            {
                PlatformError::Auth(detail)
            } else if lower.contains("timed out") || lower.contains("timeout") {
                PlatformError::Timeout(detail)
            } else {
                PlatformError::Network(detail)
            }
        }
    }
}

/// Pull an HTTP status code out of an error message like
/// "status: 429" or "429 Too Many Requests".
fn extract_http_status(error_str: &str) -> Option<u16> {
    for word in error_str.split(|c: char| !c.is_ascii_digit()) {
        if word.len() == 3 {
            if let Ok(code) = word.parse::<u16>() {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_http_status() {
        assert_eq!(extract_http_status("status: 429 Too Many Requests"), Some(429));
        assert_eq!(extract_http_status("HTTP error 503"), Some(503));
        assert_eq!(extract_http_status("connection refused"), None);
        // Out-of-range numbers are not status codes
        assert_eq!(extract_http_status("waited 999 ms"), None);
    }

    #[test]
    fn test_instance_url_normalization() {
        let adapter = MastodonAdapter::new(Some(MastodonConfig {
            instance: "mastodon.social".to_string(),
        }));
        assert_eq!(
            adapter.instance_url().unwrap(),
            "https://mastodon.social"
        );

        let adapter = MastodonAdapter::new(Some(MastodonConfig {
            instance: "https://fosstodon.org".to_string(),
        }));
        assert_eq!(adapter.instance_url().unwrap(), "https://fosstodon.org");
    }

    #[test]
    fn test_unconfigured_instance_is_auth_error() {
        let adapter = MastodonAdapter::new(None);
        assert!(matches!(
            adapter.instance_url(),
            Err(PlatformError::Auth(_))
        ));
    }
}
