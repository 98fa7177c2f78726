//! OAuth token lifecycle management
//!
//! Every publish path obtains its credentials through
//! [`TokenLifecycleManager::ensure_valid`], which transparently refreshes
//! tokens nearing expiry. Refreshes are serialized per account: OAuth
//! providers that rotate refresh tokens invalidate the old one on use,
//! so two concurrent refreshes for the same account would strand one
//! caller with a dead token.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{PlatformError, Result, SyndicastError};
use crate::platforms::AdapterRegistry;
use crate::types::{now_ts, SocialAccount};
use crate::vault::TokenVault;

/// Outcome of a proactive refresh sweep across all active accounts.
#[derive(Debug, Default)]
pub struct RefreshSweep {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct TokenLifecycleManager {
    db: Database,
    vault: TokenVault,
    registry: AdapterRegistry,
    refresh_buffer_secs: i64,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        db: Database,
        vault: TokenVault,
        registry: AdapterRegistry,
        refresh_buffer_secs: i64,
    ) -> Self {
        Self {
            db,
            vault,
            registry,
            refresh_buffer_secs,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the account with credentials guaranteed usable for an API
    /// call right now.
    ///
    /// If the access token is within the refresh buffer of expiry, the
    /// platform's refresh flow runs first and the rotated credentials are
    /// persisted before this returns. A platform without refresh support
    /// proceeds on the stored token. A failed refresh deactivates the
    /// account so no further attempts burn against dead credentials.
    pub async fn ensure_valid(&self, account_id: &str) -> Result<SocialAccount> {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        // Load inside the lock: a concurrent caller may have refreshed
        // while we waited
        let account = self
            .db
            .get_account(account_id, &self.vault)
            .await?
            .ok_or_else(|| {
                SyndicastError::InvalidInput(format!("unknown account: {}", account_id))
            })?;

        if !account.is_active {
            return Err(PlatformError::Auth(format!(
                "account {} is deactivated and must be reconnected",
                account_id
            ))
            .into());
        }

        if !account
            .credentials
            .needs_refresh(now_ts(), self.refresh_buffer_secs)
        {
            return Ok(account);
        }

        let adapter = self.registry.get(account.platform)?;
        match adapter.refresh_token(&account.credentials).await {
            Ok(fresh) => {
                self.db
                    .update_account_credentials(account_id, &fresh, &self.vault)
                    .await?;
                info!(account_id, platform = %account.platform, "refreshed access token");
                Ok(SocialAccount {
                    credentials: fresh,
                    ..account
                })
            }
            Err(PlatformError::NotSupported(_)) => {
                // Token does not rotate on this platform; use it as stored
                Ok(account)
            }
            Err(e) => {
                warn!(account_id, platform = %account.platform, error = %e,
                      "token refresh failed, deactivating account");
                self.db.set_account_active(account_id, false).await?;
                Err(PlatformError::Auth(format!(
                    "token refresh for account {} failed: {}",
                    account_id, e
                ))
                .into())
            }
        }
    }

    /// A platform rejected the stored credentials at call time (401/403
    /// on a publish). The expiry check cannot catch this: revoked tokens
    /// and non-expiring tokens look healthy until the platform says
    /// otherwise. Attempt a refresh regardless of expiry; when the
    /// platform cannot refresh or the refresh fails, deactivate the
    /// account so later posts fail fast instead of burning full retry
    /// cycles against dead credentials.
    ///
    /// Returns true when the account holds rotated, usable credentials.
    pub async fn handle_auth_rejection(&self, account_id: &str) -> Result<bool> {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        let account = match self.db.get_account(account_id, &self.vault).await? {
            Some(account) => account,
            None => return Ok(false),
        };
        if !account.is_active {
            return Ok(false);
        }

        let adapter = self.registry.get(account.platform)?;
        match adapter.refresh_token(&account.credentials).await {
            Ok(fresh) => {
                self.db
                    .update_account_credentials(account_id, &fresh, &self.vault)
                    .await?;
                info!(account_id, platform = %account.platform,
                      "rotated credentials after platform rejection");
                Ok(true)
            }
            Err(e) => {
                warn!(account_id, platform = %account.platform, error = %e,
                      "credentials rejected by platform, deactivating account");
                self.db.set_account_active(account_id, false).await?;
                Ok(false)
            }
        }
    }

    /// Refresh every active account whose token is inside the buffer.
    /// Failures deactivate the affected account and the sweep continues.
    pub async fn refresh_all_expiring(&self) -> Result<RefreshSweep> {
        let accounts = self.db.list_active_accounts(&self.vault).await?;
        let now = now_ts();
        let mut sweep = RefreshSweep::default();

        for account in accounts {
            if !account.credentials.needs_refresh(now, self.refresh_buffer_secs) {
                continue;
            }
            match self.ensure_valid(&account.id).await {
                Ok(_) => sweep.refreshed.push(account.id),
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "refresh sweep failure");
                    sweep.failed.push(account.id);
                }
            }
        }

        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;
    use crate::types::{Credentials, PlatformKind};
    use secrecy::SecretString;

    fn vault() -> TokenVault {
        TokenVault::new(SecretString::from("test-pass".to_string()))
    }

    async fn setup(adapter: MockAdapter) -> (Database, TokenVault, TokenLifecycleManager) {
        let db = Database::new(":memory:").await.unwrap();
        let v = vault();
        let registry = AdapterRegistry::all_mock(Arc::new(adapter));
        let manager = TokenLifecycleManager::new(db.clone(), vault(), registry, 300);
        (db, v, manager)
    }

    #[tokio::test]
    async fn test_fresh_token_passes_through() {
        let (db, v, manager) = setup(MockAdapter::success(PlatformKind::Twitter)).await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            Credentials::expiring("at".to_string(), "rt".to_string(), now_ts() + 3600),
        );
        db.create_account(&account, &v).await.unwrap();

        let resolved = manager.ensure_valid(&account.id).await.unwrap();
        assert_eq!(resolved.credentials.access_token, "at");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let (db, v, manager) = setup(MockAdapter::success(PlatformKind::Twitter)).await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            // 60 seconds to expiry, inside the 300 second buffer
            Credentials::expiring("old".to_string(), "rt".to_string(), now_ts() + 60),
        );
        db.create_account(&account, &v).await.unwrap();

        let resolved = manager.ensure_valid(&account.id).await.unwrap();
        assert_eq!(resolved.credentials.access_token, "old-refreshed");

        let stored = db.get_account(&account.id, &v).await.unwrap().unwrap();
        assert_eq!(stored.credentials.access_token, "old-refreshed");
    }

    #[tokio::test]
    async fn test_failed_refresh_deactivates_account() {
        let (db, v, manager) = setup(MockAdapter::refresh_failure(
            PlatformKind::Twitter,
            PlatformError::Auth("refresh token revoked".to_string()),
        ))
        .await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            Credentials::expiring("old".to_string(), "rt".to_string(), now_ts() + 10),
        );
        db.create_account(&account, &v).await.unwrap();

        let result = manager.ensure_valid(&account.id).await;
        assert!(matches!(
            result,
            Err(SyndicastError::Platform(PlatformError::Auth(_)))
        ));

        let stored = db.get_account(&account.id, &v).await.unwrap().unwrap();
        assert!(!stored.is_active);

        // Subsequent calls fail fast on the deactivated account
        let again = manager.ensure_valid(&account.id).await;
        assert!(matches!(
            again,
            Err(SyndicastError::Platform(PlatformError::Auth(_)))
        ));
    }

    #[tokio::test]
    async fn test_platform_without_refresh_uses_stored_token() {
        let adapter = MockAdapter::refresh_failure(
            PlatformKind::Mastodon,
            PlatformError::NotSupported("no refresh".to_string()),
        );
        let (db, v, manager) = setup(adapter).await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Mastodon,
            Credentials::expiring("at".to_string(), "rt".to_string(), now_ts() + 10),
        );
        db.create_account(&account, &v).await.unwrap();

        let resolved = manager.ensure_valid(&account.id).await.unwrap();
        assert_eq!(resolved.credentials.access_token, "at");
        assert!(resolved.is_active);
    }

    #[tokio::test]
    async fn test_auth_rejection_rotates_refreshable_credentials() {
        let (db, v, manager) = setup(MockAdapter::success(PlatformKind::Twitter)).await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            // Nowhere near expiry; rejection must still force a refresh
            Credentials::expiring("revoked".to_string(), "rt".to_string(), now_ts() + 86400),
        );
        db.create_account(&account, &v).await.unwrap();

        assert!(manager.handle_auth_rejection(&account.id).await.unwrap());

        let stored = db.get_account(&account.id, &v).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.credentials.access_token, "revoked-refreshed");
    }

    #[tokio::test]
    async fn test_auth_rejection_without_refresh_deactivates_account() {
        let adapter = MockAdapter::refresh_failure(
            PlatformKind::Mastodon,
            PlatformError::NotSupported("no refresh flow".to_string()),
        );
        let (db, v, manager) = setup(adapter).await;

        let account = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Mastodon,
            Credentials::non_expiring("revoked".to_string()),
        );
        db.create_account(&account, &v).await.unwrap();

        assert!(!manager.handle_auth_rejection(&account.id).await.unwrap());

        let stored = db.get_account(&account.id, &v).await.unwrap().unwrap();
        assert!(!stored.is_active);

        // Already-deactivated accounts are left alone
        assert!(!manager.handle_auth_rejection(&account.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_sweep_reports_outcomes() {
        let (db, v, manager) = setup(MockAdapter::success(PlatformKind::Twitter)).await;

        let expiring = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            Credentials::expiring("a".to_string(), "r".to_string(), now_ts() + 30),
        );
        let healthy = SocialAccount::new(
            "owner".to_string(),
            PlatformKind::Twitter,
            Credentials::expiring("b".to_string(), "r".to_string(), now_ts() + 86400),
        );
        db.create_account(&expiring, &v).await.unwrap();
        db.create_account(&healthy, &v).await.unwrap();

        let sweep = manager.refresh_all_expiring().await.unwrap();
        assert_eq!(sweep.refreshed, vec![expiring.id]);
        assert!(sweep.failed.is_empty());
    }
}
