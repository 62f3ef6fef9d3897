//! OAuth credential management for platform accounts
//!
//! Tokens live in the store alongside everything else. The manager hands out
//! access tokens that are fresh for at least a configurable margin, refreshing
//! through a [`TokenRefresher`] when they are not. Concurrent requests for the
//! same (team, platform) credential coalesce into a single refresh; a failed
//! refresh leaves the stored credential untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SyndicError};
use crate::store::Store;
use crate::types::{Platform, PlatformAccount};

pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Fresh credentials obtained from a provider's token endpoint
#[derive(Debug, Clone)]
pub struct RefreshedCredentials {
    pub access_token: String,
    /// Some providers rotate the refresh token on every grant
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

/// Exchange a refresh token for new credentials
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account: &PlatformAccount) -> Result<RefreshedCredentials>;
}

/// OAuth token-endpoint settings for one platform
#[derive(Debug, Clone)]
pub struct OauthEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Refresher that speaks the standard `grant_type=refresh_token` form exchange
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    endpoints: HashMap<Platform, OauthEndpoint>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl HttpTokenRefresher {
    pub fn new(endpoints: HashMap<Platform, OauthEndpoint>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Endpoints from every enabled platform section carrying full OAuth
    /// credentials.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let endpoints = config
            .enabled_platforms()
            .into_iter()
            .filter_map(|(platform, api)| {
                let endpoint = OauthEndpoint {
                    token_url: api.token_url.clone()?,
                    client_id: api.client_id.clone()?,
                    client_secret: api.client_secret.clone()?,
                };
                Some((platform, endpoint))
            })
            .collect();
        Self::new(endpoints)
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, account: &PlatformAccount) -> Result<RefreshedCredentials> {
        let endpoint = self.endpoints.get(&account.platform).ok_or_else(|| {
            SyndicError::UnsupportedPlatform(format!(
                "no oauth endpoint configured for {}",
                account.platform
            ))
        })?;
        let refresh_token = account.refresh_token.as_deref().ok_or_else(|| {
            SyndicError::Validation(format!(
                "account {}/{} has no refresh token",
                account.team_id, account.platform
            ))
        })?;

        let response = self
            .client
            .post(&endpoint.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &endpoint.client_id),
                ("client_secret", &endpoint.client_secret),
            ])
            .send()
            .await
            .map_err(|e| SyndicError::Validation(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(SyndicError::Validation(format!(
                "token refresh for {}/{} rejected with status {}",
                account.team_id,
                account.platform,
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyndicError::Validation(format!("malformed token response: {}", e)))?;

        let now = chrono::Utc::now().timestamp();
        Ok(RefreshedCredentials {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_in.map(|secs| now + secs),
        })
    }
}

/// Store-backed token manager with single-flight refresh
pub struct TokenManager {
    store: Store,
    refresher: Arc<dyn TokenRefresher>,
    refresh_margin_secs: i64,
    // One async mutex per credential; the outer lock only guards the map.
    locks: std::sync::Mutex<HashMap<(String, Platform), Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Store, refresher: Arc<dyn TokenRefresher>, refresh_margin_secs: i64) -> Self {
        Self {
            store,
            refresher,
            refresh_margin_secs,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, team_id: &str, platform: Platform) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((team_id.to_string(), platform))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Access token for (team, platform), refreshed if it expires within the
    /// margin. `Ok(None)` means no usable credential exists: the account is
    /// missing, revoked, or could not be refreshed.
    pub async fn get_valid_access_token(
        &self,
        team_id: &str,
        platform: Platform,
    ) -> Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        let Some(account) = self.store.get_account(team_id, platform).await? else {
            return Ok(None);
        };
        if account.revoked {
            return Ok(None);
        }
        if account.token_is_fresh(now, self.refresh_margin_secs) {
            return Ok(account.access_token);
        }

        let key_lock = self.lock_for(team_id, platform);
        let _guard = key_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        let now = chrono::Utc::now().timestamp();
        let Some(account) = self.store.get_account(team_id, platform).await? else {
            return Ok(None);
        };
        if account.revoked {
            return Ok(None);
        }
        if account.token_is_fresh(now, self.refresh_margin_secs) {
            return Ok(account.access_token);
        }

        self.do_refresh(account).await
    }

    /// Force a refresh for (team, platform). Returns true when new
    /// credentials were stored; false leaves the prior state intact.
    /// Concurrent callers for the same key share one underlying refresh.
    pub async fn refresh_token(&self, team_id: &str, platform: Platform) -> Result<bool> {
        let key_lock = self.lock_for(team_id, platform);
        let _guard = key_lock.lock().await;

        let Some(account) = self.store.get_account(team_id, platform).await? else {
            return Ok(false);
        };
        if account.revoked {
            return Ok(false);
        }
        Ok(self.do_refresh(account).await?.is_some())
    }

    /// True when a usable, unexpired access token is stored right now.
    /// Ignores the proactive refresh margin.
    pub async fn has_valid_token(&self, team_id: &str, platform: Platform) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        Ok(self
            .store
            .get_account(team_id, platform)
            .await?
            .map(|account| account.token_is_fresh(now, 0))
            .unwrap_or(false))
    }

    /// Run the refresher and persist the outcome. Caller holds the key lock.
    async fn do_refresh(&self, account: PlatformAccount) -> Result<Option<String>> {
        match self.refresher.refresh(&account).await {
            Ok(fresh) => {
                let mut updated = account;
                updated.access_token = Some(fresh.access_token.clone());
                if fresh.refresh_token.is_some() {
                    updated.refresh_token = fresh.refresh_token;
                }
                updated.expires_at = fresh.expires_at;
                updated.updated_at = chrono::Utc::now().timestamp();
                self.store.upsert_account(&updated).await?;
                debug!(
                    team = %updated.team_id,
                    platform = %updated.platform,
                    "refreshed access token"
                );
                Ok(Some(fresh.access_token))
            }
            Err(e) => {
                // Stored credential is left exactly as it was.
                warn!("token refresh failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Store (or replace) credentials obtained out of band, clearing any
    /// revocation flag.
    pub async fn store_tokens(
        &self,
        team_id: &str,
        platform: Platform,
        account_name: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let account = PlatformAccount {
            team_id: team_id.to_string(),
            platform,
            account_name: account_name.to_string(),
            access_token: Some(access_token),
            refresh_token,
            expires_at,
            revoked: false,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.upsert_account(&account).await
    }

    /// Drop stored tokens and mark the credential revoked. In-flight publish
    /// attempts holding the old token will fail fatally on their own.
    pub async fn revoke_tokens(&self, team_id: &str, platform: Platform) -> Result<()> {
        self.store.revoke_account(team_id, platform).await
    }

    pub async fn account(&self, team_id: &str, platform: Platform) -> Result<Option<PlatformAccount>> {
        self.store.get_account(team_id, platform).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _account: &PlatformAccount) -> Result<RefreshedCredentials> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Hold the single-flight lock long enough for waiters to pile up.
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            if self.fail {
                return Err(SyndicError::Validation("endpoint said no".into()));
            }
            Ok(RefreshedCredentials {
                access_token: "fresh-token".into(),
                refresh_token: Some("rotated-refresh".into()),
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            })
        }
    }

    async fn seed_account(store: &Store, expires_at: Option<i64>) {
        let account = PlatformAccount {
            team_id: "team-1".into(),
            platform: Platform::Meta,
            account_name: "Acme".into(),
            access_token: Some("stale-token".into()),
            refresh_token: Some("refresh-1".into()),
            expires_at,
            revoked: false,
            updated_at: chrono::Utc::now().timestamp(),
        };
        store.upsert_account(&account).await.unwrap();
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() + 7200)).await;
        let refresher = CountingRefresher::new(false);
        let manager = TokenManager::new(store, refresher.clone(), DEFAULT_REFRESH_MARGIN_SECS);

        let token = manager
            .get_valid_access_token("team-1", Platform::Meta)
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("stale-token"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed_and_persisted() {
        let store = Store::in_memory().await.unwrap();
        // Expires inside the margin.
        seed_account(&store, Some(chrono::Utc::now().timestamp() + 60)).await;
        let refresher = CountingRefresher::new(false);
        let manager =
            TokenManager::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_MARGIN_SECS);

        let token = manager
            .get_valid_access_token("team-1", Platform::Meta)
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("fresh-token"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let stored = store
            .get_account("team-1", Platform::Meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("fresh-token"));
        assert_eq!(stored.refresh_token.as_deref(), Some("rotated-refresh"));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() - 10)).await;
        let refresher = CountingRefresher::new(false);
        let manager = Arc::new(TokenManager::new(
            store,
            refresher.clone(),
            DEFAULT_REFRESH_MARGIN_SECS,
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                m.get_valid_access_token("team-1", Platform::Meta).await
            }));
        }
        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.as_deref(), Some("fresh-token"));
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stored_credential() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() - 10)).await;
        let refresher = CountingRefresher::new(true);
        let manager =
            TokenManager::new(store.clone(), refresher.clone(), DEFAULT_REFRESH_MARGIN_SECS);

        let token = manager
            .get_valid_access_token("team-1", Platform::Meta)
            .await
            .unwrap();
        assert!(token.is_none());

        let stored = store
            .get_account("team-1", Platform::Meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("stale-token"));
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!stored.revoked);
    }

    #[tokio::test]
    async fn revoked_account_yields_no_token() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() + 7200)).await;
        store.revoke_account("team-1", Platform::Meta).await.unwrap();

        let refresher = CountingRefresher::new(false);
        let manager = TokenManager::new(store, refresher.clone(), DEFAULT_REFRESH_MARGIN_SECS);
        let token = manager
            .get_valid_access_token("team-1", Platform::Meta)
            .await
            .unwrap();
        assert!(token.is_none());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_account_yields_no_token() {
        let store = Store::in_memory().await.unwrap();
        let manager = TokenManager::new(
            store,
            CountingRefresher::new(false),
            DEFAULT_REFRESH_MARGIN_SECS,
        );
        let token = manager
            .get_valid_access_token("team-1", Platform::X)
            .await
            .unwrap();
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn explicit_refresh_reports_success() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() - 10)).await;
        let manager = TokenManager::new(
            store.clone(),
            CountingRefresher::new(false),
            DEFAULT_REFRESH_MARGIN_SECS,
        );

        assert!(!manager.has_valid_token("team-1", Platform::Meta).await.unwrap());
        assert!(manager.refresh_token("team-1", Platform::Meta).await.unwrap());
        assert!(manager.has_valid_token("team-1", Platform::Meta).await.unwrap());

        // Unknown key refreshes nothing.
        assert!(!manager.refresh_token("team-9", Platform::X).await.unwrap());
    }

    #[tokio::test]
    async fn explicit_refresh_failure_returns_false() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, Some(chrono::Utc::now().timestamp() - 10)).await;
        let manager = TokenManager::new(
            store.clone(),
            CountingRefresher::new(true),
            DEFAULT_REFRESH_MARGIN_SECS,
        );

        assert!(!manager.refresh_token("team-1", Platform::Meta).await.unwrap());
        let stored = store
            .get_account("team-1", Platform::Meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("stale-token"));
    }

    #[tokio::test]
    async fn store_tokens_clears_revocation() {
        let store = Store::in_memory().await.unwrap();
        seed_account(&store, None).await;
        store.revoke_account("team-1", Platform::Meta).await.unwrap();

        let manager = TokenManager::new(
            store.clone(),
            CountingRefresher::new(false),
            DEFAULT_REFRESH_MARGIN_SECS,
        );
        manager
            .store_tokens(
                "team-1",
                Platform::Meta,
                "Acme",
                "brand-new".into(),
                Some("refresh-2".into()),
                Some(chrono::Utc::now().timestamp() + 3600),
            )
            .await
            .unwrap();

        let token = manager
            .get_valid_access_token("team-1", Platform::Meta)
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("brand-new"));
    }
}
