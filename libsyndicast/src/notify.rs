//! Terminal-outcome notification fanout
//!
//! When a post reaches PUBLISHED or terminal FAILED, the fanout persists
//! an in-app notification row, pushes to any realtime channel, and
//! delivers a signed webhook to each of the owner's active endpoints.
//! Delivery is strictly fire-and-forget: the publish pipeline has
//! already committed its state change and nothing here may fail it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::db::{Database, WebhookEndpoint};
use crate::types::{now_ts, NotificationEvent, NotificationKind, PlatformKind, Post};

type HmacSha256 = Hmac<Sha256>;

/// Realtime delivery channel (websocket hub, push relay). The engine
/// ships with a logging no-op; a serving layer can inject a real one.
#[async_trait]
pub trait RealtimePush: Send + Sync {
    async fn push(&self, event: &NotificationEvent);
}

/// Default realtime channel: logs and drops.
pub struct NoopPush;

#[async_trait]
impl RealtimePush for NoopPush {
    async fn push(&self, event: &NotificationEvent) {
        debug!(kind = event.kind.as_str(), user = %event.target_user_id,
               "realtime push (noop)");
    }
}

/// Final result of one webhook delivery, after all attempts.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub success: bool,
    /// Status of the last response, if the endpoint answered at all.
    pub status_code: Option<u16>,
    /// Last transport or rejection error when delivery failed.
    pub error: Option<String>,
    pub attempts: u32,
}

/// Signs and delivers webhook payloads with bounded retries.
pub struct WebhookSender {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl WebhookSender {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self::with_backoff(attempt_timeout, BackoffPolicy::webhook_default())
    }

    pub fn with_backoff(attempt_timeout: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(attempt_timeout)
                .build()
                .unwrap_or_default(),
            backoff,
        }
    }

    /// Hex HMAC-SHA256 of the payload body under the endpoint secret.
    /// Receivers recompute this over the raw body to authenticate us.
    pub fn sign(secret: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(body.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    /// Deliver one payload to one endpoint. Each of the three attempts
    /// waits out its backoff delay first (1s, 2s, 4s under the default
    /// policy); a non-2xx response counts as a failed attempt. Never
    /// raises: the final outcome is returned and logged, nothing more.
    pub async fn deliver(
        &self,
        endpoint: &WebhookEndpoint,
        event_kind: &str,
        body: String,
    ) -> WebhookOutcome {
        let signature = Self::sign(&endpoint.secret, &body);
        let delivery_id = uuid::Uuid::new_v4().to_string();

        let mut last_status = None;
        let mut last_error = None;
        for attempt in 1..=self.backoff.cap {
            tokio::time::sleep(self.backoff.delay_after(attempt)).await;

            let result = self
                .client
                .post(&endpoint.url)
                .header("Content-Type", "application/json")
                .header("X-Syndicast-Signature", format!("sha256={}", signature))
                .header("X-Syndicast-Event", event_kind)
                .header("X-Syndicast-Delivery", &delivery_id)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %endpoint.url, delivery_id, attempt, "webhook delivered");
                    return WebhookOutcome {
                        success: true,
                        status_code: Some(response.status().as_u16()),
                        error: None,
                        attempts: attempt,
                    };
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(url = %endpoint.url, delivery_id, attempt, status,
                          "webhook attempt rejected");
                    last_status = Some(status);
                    last_error = Some(format!("endpoint answered {}", status));
                }
                Err(e) => {
                    warn!(url = %endpoint.url, delivery_id, attempt, error = %e,
                          "webhook attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(url = %endpoint.url, delivery_id, "webhook delivery abandoned");
        WebhookOutcome {
            success: false,
            status_code: last_status,
            error: last_error,
            attempts: self.backoff.cap,
        }
    }
}

pub struct NotificationFanout {
    db: Database,
    sender: Arc<WebhookSender>,
    realtime: Arc<dyn RealtimePush>,
}

impl NotificationFanout {
    pub fn new(db: Database, sender: WebhookSender, realtime: Arc<dyn RealtimePush>) -> Self {
        Self {
            db,
            sender: Arc::new(sender),
            realtime,
        }
    }

    /// Fan out a terminal publish outcome. Persists the notification,
    /// pushes realtime, and spawns webhook deliveries in the background.
    /// Infallible by contract: every internal failure is logged and
    /// swallowed.
    pub async fn post_published(&self, post: &Post, platform: PlatformKind) {
        let event = NotificationEvent {
            kind: NotificationKind::PostPublished,
            target_user_id: post.owner_id.clone(),
            payload: json!({
                "post_id": post.id,
                "account_id": post.account_id,
                "platform": platform.as_str(),
                "external_id": post.platform_post_id,
                "external_url": post.platform_post_url,
                "published_at": post.published_at,
            }),
            high_priority: false,
        };
        self.fan_out(event).await;
    }

    pub async fn post_failed(&self, post: &Post, platform: PlatformKind, reason: &str) {
        let event = NotificationEvent {
            kind: NotificationKind::PostFailed,
            target_user_id: post.owner_id.clone(),
            payload: json!({
                "post_id": post.id,
                "account_id": post.account_id,
                "platform": platform.as_str(),
                "error": reason,
                "retry_count": post.retry_count,
            }),
            high_priority: true,
        };
        self.fan_out(event).await;
    }

    async fn fan_out(&self, event: NotificationEvent) {
        if let Err(e) = self.db.create_notification(&event, now_ts()).await {
            warn!(error = %e, "failed to persist notification");
        }

        self.realtime.push(&event).await;

        let endpoints = match self.db.active_webhooks_for_owner(&event.target_user_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(error = %e, "failed to load webhook endpoints");
                return;
            }
        };

        if endpoints.is_empty() {
            return;
        }

        let body = json!({
            "event": event.kind.as_str(),
            "timestamp": now_ts(),
            "data": event.payload,
        })
        .to_string();

        for endpoint in endpoints {
            let sender = self.sender.clone();
            let body = body.clone();
            let kind = event.kind.as_str();
            // Detached: delivery retries must not block the publish loop
            tokio::spawn(async move {
                sender.deliver(&endpoint, kind, body).await;
            });
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
