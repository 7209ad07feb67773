//! Request authentication: Basic credentials or OAuth2 bearer tokens

use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialPrompt, CredentialStore, Credentials};
use crate::oauth::{OAuthError, TokenRefresher};
use crate::types::error::{EasError, Result};
use crate::types::AuthMode;

/// Header value plus the user name to put in the `User` parameter
#[derive(Clone)]
pub struct Authorization {
    pub header: String,
    pub user: String,
}

pub struct Authenticator {
    account: String,
    mode: AuthMode,
    credentials: Arc<dyn CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    /// Serializes token refreshes; share it between sessions of one account
    refresh_lock: Arc<Mutex<()>>,
    grace_secs: i64,
}

impl Authenticator {
    pub fn new(
        account: &str,
        mode: AuthMode,
        credentials: Arc<dyn CredentialStore>,
        grace_secs: i64,
    ) -> Self {
        Self {
            account: account.to_string(),
            mode,
            credentials,
            refresher: None,
            prompt: None,
            refresh_lock: Arc::new(Mutex::new(())),
            grace_secs,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_refresh_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.refresh_lock = lock;
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.get(&self.account)?)
    }

    /// Authorization for the next request, refreshing an expiring token first
    pub async fn authorization(&self, default_user: &str) -> Result<Authorization> {
        match self.mode {
            AuthMode::Basic => {
                let credentials = self.credentials()?;
                let encoded =
                    STANDARD.encode(format!("{}:{}", credentials.user, credentials.secret));
                let user = if credentials.user.is_empty() {
                    default_user.to_string()
                } else {
                    credentials.user
                };
                Ok(Authorization {
                    header: format!("Basic {}", encoded),
                    user,
                })
            }
            AuthMode::OAuth2 => {
                let token = self.access_token().await?;
                Ok(Authorization {
                    header: format!("Bearer {}", token),
                    user: default_user.to_string(),
                })
            }
        }
    }

    async fn access_token(&self) -> Result<String> {
        let tokens = self.credentials.get_tokens(&self.account)?;
        if !tokens.is_expired(self.grace_secs) {
            return Ok(tokens.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // another task may have refreshed while we waited
        let tokens = self.credentials.get_tokens(&self.account)?;
        if !tokens.is_expired(self.grace_secs) {
            debug!("Token for {} already refreshed", self.account);
            return Ok(tokens.access_token);
        }

        let refresher = self
            .refresher
            .as_ref()
            .ok_or_else(|| EasError::Config("OAuth2 account without token refresher".to_string()))?;
        let refresh_token = tokens
            .refresh_token
            .clone()
            .ok_or_else(|| refresh_error(OAuthError::MissingRefreshToken))?;

        info!("Refreshing access token for {}", self.account);
        let refreshed = refresher
            .refresh(&refresh_token)
            .await
            .map_err(refresh_error)?;
        self.credentials
            .update_tokens(&self.account, &refreshed)?;

        Ok(refreshed.access_token)
    }

    /// Refresh an empty or expiring OAuth2 token now; Basic is left alone
    pub async fn ensure_fresh(&self) -> Result<()> {
        if self.mode == AuthMode::OAuth2 {
            self.access_token().await?;
        }
        Ok(())
    }

    /// Drop the cached access token so the next request refreshes it
    pub fn invalidate_token(&self) -> Result<()> {
        let mut tokens = self.credentials.get_tokens(&self.account)?;
        tokens.access_token.clear();
        self.credentials.update_tokens(&self.account, &tokens)?;
        debug!("Cleared access token for {}", self.account);
        Ok(())
    }

    /// Ask for new Basic credentials; `false` when cancelled or no prompt is set
    pub async fn prompt_for_credentials(&self) -> Result<bool> {
        let Some(prompt) = &self.prompt else {
            warn!("No credential prompt available for {}", self.account);
            return Ok(false);
        };

        let user = self
            .credentials
            .get(&self.account)
            .map(|c| c.user)
            .unwrap_or_default();

        match prompt.prompt(&self.account, &user).await {
            Some(credentials) => {
                self.credentials
                    .update(&self.account, &credentials.user, &credentials.secret)?;
                info!("Updated credentials for {}", self.account);
                Ok(true)
            }
            None => {
                info!("Credential prompt cancelled for {}", self.account);
                Ok(false)
            }
        }
    }
}

fn refresh_error(err: OAuthError) -> EasError {
    match err {
        OAuthError::Request(message) => EasError::Network(message),
        other => {
            warn!("Token refresh rejected: {}", other);
            EasError::Auth(401)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::oauth::OAuthTokens;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(
            &self,
            refresh_token: &str,
        ) -> std::result::Result<OAuthTokens, OAuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(OAuthTokens {
                access_token: format!("fresh-from-{}", refresh_token),
                refresh_token: Some(refresh_token.to_string()),
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            })
        }
    }

    fn oauth_store(access: &str, expires_at: i64) -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new().with_password("acc", "jdoe", ""));
        store
            .update_tokens(
                "acc",
                &OAuthTokens {
                    access_token: access.to_string(),
                    refresh_token: Some("rt".to_string()),
                    expires_at: Some(expires_at),
                },
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_basic_header() {
        let store = Arc::new(MemoryCredentialStore::new().with_password("acc", "jdoe", "pw"));
        let auth = Authenticator::new("acc", AuthMode::Basic, store, 30);
        let authorization = auth.authorization("fallback").await.unwrap();
        assert_eq!(authorization.header, format!("Basic {}", STANDARD.encode("jdoe:pw")));
        assert_eq!(authorization.user, "jdoe");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let store = oauth_store("stale", chrono::Utc::now().timestamp() + 10);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let auth = Authenticator::new("acc", AuthMode::OAuth2, store.clone(), 30)
            .with_refresher(refresher.clone());

        let authorization = auth.authorization("jdoe@example.com").await.unwrap();
        assert_eq!(authorization.header, "Bearer fresh-from-rt");
        assert_eq!(store.get_tokens("acc").unwrap().access_token, "fresh-from-rt");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_refresh_once() {
        let store = oauth_store("", 0);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let lock = Arc::new(Mutex::new(()));
        let first = Authenticator::new("acc", AuthMode::OAuth2, store.clone(), 30)
            .with_refresher(refresher.clone())
            .with_refresh_lock(lock.clone());
        let second = Authenticator::new("acc", AuthMode::OAuth2, store.clone(), 30)
            .with_refresher(refresher.clone())
            .with_refresh_lock(lock);

        let (a, b) = tokio::join!(first.authorization("u"), second.authorization("u"));
        assert_eq!(a.unwrap().header, b.unwrap().header);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let store = oauth_store("valid", chrono::Utc::now().timestamp() + 3600);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let auth = Authenticator::new("acc", AuthMode::OAuth2, store, 30)
            .with_refresher(refresher.clone());

        assert_eq!(auth.authorization("u").await.unwrap().header, "Bearer valid");
        auth.invalidate_token().unwrap();
        assert_eq!(auth.authorization("u").await.unwrap().header, "Bearer fresh-from-rt");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_refreshes_cleared_token() {
        let store = oauth_store("valid", chrono::Utc::now().timestamp() + 3600);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
        });
        let auth = Authenticator::new("acc", AuthMode::OAuth2, store.clone(), 30)
            .with_refresher(refresher.clone());

        auth.ensure_fresh().await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);

        auth.invalidate_token().unwrap();
        auth.ensure_fresh().await.unwrap();
        assert_eq!(store.get_tokens("acc").unwrap().access_token, "fresh-from-rt");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prompt_without_prompter_is_cancel() {
        let store = Arc::new(MemoryCredentialStore::new().with_password("acc", "jdoe", "pw"));
        let auth = Authenticator::new("acc", AuthMode::Basic, store, 30);
        assert!(!auth.prompt_for_credentials().await.unwrap());
    }
}
