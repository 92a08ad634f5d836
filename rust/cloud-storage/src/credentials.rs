//! Credentials consumed by the client.
//!
//! Acquiring credentials is left to the caller: anything that can hand out a
//! bearer token (and, for URL signing, a service-account key) implements
//! [CredentialProvider]. [StaticCredentials] covers fixed values and
//! [CachedCredentials] puts a token cache in front of any provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::CredentialError;

/// Default slack before expiry at which a cached token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// An OAuth-style access token used in the `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    /// A token that never expires
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Set the instant after which the token is no longer accepted
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The raw token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token expires, if it does
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True when the token expires within `margin` of `now`
    pub fn is_expiring(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
                now.checked_add_signed(margin)
                    .is_none_or(|deadline| deadline >= expires_at)
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A service account able to sign URLs: its email and secret key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    account: String,
    secret: Vec<u8>,
}

impl SigningIdentity {
    /// Create a new identity
    pub fn new(account: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }

    /// Service-account email, embedded in the credential scope
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Key material the signing key is derived from
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for the storage client.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce a token for authenticated JSON API calls
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError>;

    /// Produce the identity URLs are signed with. Providers that only hold a
    /// bearer token return [CredentialError::SigningUnsupported].
    async fn signing_identity(&self) -> Result<SigningIdentity, CredentialError>;
}

#[async_trait]
impl<P> CredentialProvider for Arc<P>
where
    P: CredentialProvider + ?Sized,
{
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError> {
        (**self).bearer_token().await
    }

    async fn signing_identity(&self) -> Result<SigningIdentity, CredentialError> {
        (**self).signing_identity().await
    }
}

/// Fixed credentials, typically read from configuration or used in tests.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: BearerToken,
    identity: Option<SigningIdentity>,
}

impl StaticCredentials {
    /// Credentials holding only a bearer token; signing is unsupported
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: BearerToken::new(token),
            identity: None,
        }
    }

    /// Add a signing identity so these credentials can sign URLs
    pub fn with_signing_identity(
        mut self,
        account: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        self.identity = Some(SigningIdentity::new(account, secret));
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError> {
        Ok(self.token.clone())
    }

    async fn signing_identity(&self) -> Result<SigningIdentity, CredentialError> {
        self.identity.clone().ok_or_else(|| {
            CredentialError::SigningUnsupported("no private key configured".into())
        })
    }
}

/// Caches the bearer token of an inner provider until it is about to expire.
///
/// The cache slot is held behind an async mutex for the duration of a
/// refresh, so concurrent callers that find the token stale wait on the one
/// refresh in flight instead of each hitting the inner provider.
pub struct CachedCredentials<P> {
    provider: P,
    cached: Mutex<Option<BearerToken>>,
    margin: Duration,
}

impl<P> CachedCredentials<P>
where
    P: CredentialProvider,
{
    /// Wrap `provider`, refreshing tokens [DEFAULT_REFRESH_MARGIN] before
    /// they expire
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            cached: Mutex::new(None),
            margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Change how long before expiry a token is considered stale
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// The wrapped provider
    pub fn inner(&self) -> &P {
        &self.provider
    }

    /// Fetch a fresh token from the inner provider and cache it, regardless of
    /// the state of the cached one
    pub async fn refresh(&self) -> Result<BearerToken, CredentialError> {
        let mut cached = self.cached.lock().await;
        let token = self.provider.bearer_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call fetches a new one
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}

#[async_trait]
impl<P> CredentialProvider for CachedCredentials<P>
where
    P: CredentialProvider,
{
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expiring(Utc::now(), self.margin) {
                return Ok(token.clone());
            }
        }

        tracing::debug!("Refreshing cached bearer token");
        let token = self.provider.bearer_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn signing_identity(&self) -> Result<SigningIdentity, CredentialError> {
        self.provider.signing_identity().await
    }
}

impl<P> std::fmt::Debug for CachedCredentials<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredentials")
            .field("margin", &self.margin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out numbered tokens that expire `lifetime` after issue.
    struct CountingProvider {
        calls: AtomicUsize,
        lifetime: chrono::Duration,
    }

    impl CountingProvider {
        fn new(lifetime: chrono::Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn bearer_token(&self) -> Result<BearerToken, CredentialError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(BearerToken::new(format!("token-{call}")).with_expiry(Utc::now() + self.lifetime))
        }

        async fn signing_identity(&self) -> Result<SigningIdentity, CredentialError> {
            Err(CredentialError::SigningUnsupported("counting".into()))
        }
    }

    #[test]
    fn it_detects_expiring_tokens() {
        let now = Utc::now();
        let token = BearerToken::new("t").with_expiry(now + chrono::Duration::seconds(30));

        assert!(token.is_expiring(now, Duration::from_secs(60)));
        assert!(!token.is_expiring(now, Duration::from_secs(10)));
        assert!(!BearerToken::new("t").is_expiring(now, Duration::from_secs(3600)));
    }

    #[test]
    fn it_redacts_secrets_in_debug_output() {
        let identity = SigningIdentity::new("svc@project.iam", b"super-secret".to_vec());
        let token = BearerToken::new("ya29.secret-token");

        let rendered = format!("{identity:?} {token:?}");
        assert!(rendered.contains("svc@project.iam"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("ya29"));
    }

    #[tokio::test]
    async fn it_refuses_to_sign_without_a_key() {
        let credentials = StaticCredentials::new("token");
        assert!(matches!(
            credentials.signing_identity().await,
            Err(CredentialError::SigningUnsupported(_))
        ));

        let credentials = credentials.with_signing_identity("svc@project.iam", b"key".to_vec());
        assert_eq!(
            credentials.signing_identity().await.unwrap().account(),
            "svc@project.iam"
        );
    }

    #[tokio::test]
    async fn it_reuses_fresh_tokens() {
        let credentials = CachedCredentials::new(CountingProvider::new(chrono::Duration::hours(1)));

        let first = credentials.bearer_token().await.unwrap();
        let second = credentials.bearer_token().await.unwrap();

        assert_eq!(first.token(), "token-0");
        assert_eq!(second.token(), "token-0");
        assert_eq!(credentials.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn it_refreshes_tokens_close_to_expiry() {
        let credentials = CachedCredentials::new(CountingProvider::new(chrono::Duration::seconds(5)))
            .with_refresh_margin(Duration::from_secs(60));

        credentials.bearer_token().await.unwrap();
        let second = credentials.bearer_token().await.unwrap();

        assert_eq!(second.token(), "token-1");
        assert_eq!(credentials.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn it_shares_one_refresh_between_concurrent_callers() {
        let credentials = Arc::new(CachedCredentials::new(CountingProvider::new(
            chrono::Duration::hours(1),
        )));

        let tasks = (0..16)
            .map(|_| {
                let credentials = credentials.clone();
                tokio::spawn(async move { credentials.bearer_token().await })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().token(), "token-0");
        }
        assert_eq!(credentials.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn it_forces_refresh_on_demand() {
        let credentials = CachedCredentials::new(CountingProvider::new(chrono::Duration::hours(1)));

        credentials.bearer_token().await.unwrap();
        let refreshed = credentials.refresh().await.unwrap();
        assert_eq!(refreshed.token(), "token-1");

        credentials.invalidate().await;
        assert_eq!(credentials.bearer_token().await.unwrap().token(), "token-2");
    }
}
