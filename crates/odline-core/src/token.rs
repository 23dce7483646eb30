//! Bearer token acquisition and caching.
//!
//! A single token is shared by every worker in the process. It is fetched
//! lazily, replaced wholesale on refresh and never expired by a timer:
//! staleness shows up as a 403, which makes the caller ask for a refresh.
//! Concurrent refreshes are allowed; the last writer wins and any worker
//! still holding an older token recovers through its own refresh.

use std::sync::{Arc, LazyLock, RwLock};

use reqwest::Url;
use serde::Deserialize;

use crate::error::{AuthError, TransportError};
use crate::http::{HttpClient, ResponseContainer};

const SAML2_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:saml2-bearer";

/// Single-slot token store.
pub trait TokenCache: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, token: String);
    fn invalidate(&self);
}

/// Thread-safe in-memory [`TokenCache`].
#[derive(Debug, Default)]
pub struct SharedTokenCache {
    slot: RwLock<Option<String>>,
}

static GLOBAL_CACHE: LazyLock<Arc<SharedTokenCache>> =
    LazyLock::new(|| Arc::new(SharedTokenCache::default()));

impl SharedTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used unless a caller injects its own.
    pub fn global() -> Arc<SharedTokenCache> {
        GLOBAL_CACHE.clone()
    }
}

// A poisoned lock only means another thread panicked mid-assignment of a
// whole `Option<String>`, so the value inside is still usable.
impl TokenCache for SharedTokenCache {
    fn get(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, token: String) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    fn invalidate(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Produces a brand-new token on every call.
pub trait TokenSource: Send + Sync {
    fn fetch_token(&self) -> Result<String, AuthError>;
}

/// Cached access to a [`TokenSource`].
pub struct TokenManager {
    cache: Arc<dyn TokenCache>,
    source: Box<dyn TokenSource>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Manager backed by the process-wide cache.
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self::with_cache(source, SharedTokenCache::global())
    }

    pub fn with_cache(source: impl TokenSource + 'static, cache: Arc<dyn TokenCache>) -> Self {
        Self {
            cache,
            source: Box::new(source),
        }
    }

    /// Cached token, or a fresh one when `refresh` is set or nothing is cached.
    ///
    /// A failed refresh leaves the previous token in place.
    pub fn get_token(&self, refresh: bool) -> Result<String, AuthError> {
        if !refresh {
            if let Some(token) = self.cache.get() {
                return Ok(token);
            }
        }
        let token = self.source.fetch_token()?;
        self.cache.set(token.clone());
        Ok(token)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }
}

/// Inputs for building a signed assertion.
#[derive(Debug, Clone)]
pub struct AssertionRequest {
    pub token_url: Url,
    pub client_id: String,
    pub company_id: String,
    pub user_id: String,
    pub private_key: String,
    /// Requested validity of the assertion. Signers that delegate to a remote
    /// identity provider get whatever validity the provider grants.
    pub expire_in_minutes: u32,
}

/// Turns credentials into a single-use assertion string.
pub trait AssertionSigner: Send + Sync {
    fn sign(&self, request: &AssertionRequest) -> Result<String, AuthError>;
}

/// Signs assertions through the service's own identity provider endpoint
/// (`/oauth/idp` next to the token endpoint).
#[derive(Debug, Clone)]
pub struct IdpAssertionSigner {
    http: HttpClient,
}

impl IdpAssertionSigner {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// `https://host/oauth/token` -> `https://host/oauth/idp`
    pub fn idp_url(token_url: &Url) -> Url {
        let mut url = token_url.clone();
        let path = token_url.path();
        let new_path = match path.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/idp"),
            None => "/oauth/idp".to_string(),
        };
        url.set_path(&new_path);
        url.set_query(None);
        url
    }
}

impl AssertionSigner for IdpAssertionSigner {
    fn sign(&self, request: &AssertionRequest) -> Result<String, AuthError> {
        let idp = Self::idp_url(&request.token_url);
        log::debug!(
            "Requesting assertion from {idp} (requested validity {}m)",
            request.expire_in_minutes
        );
        let response = self
            .http
            .post_form(
                &idp,
                &[
                    ("client_id", request.client_id.as_str()),
                    ("user_id", request.user_id.as_str()),
                    ("token_url", request.token_url.as_str()),
                    ("private_key", request.private_key.as_str()),
                ],
            )
            .map_err(endpoint_unreachable)?;
        let body = checked_body(response)?;
        let assertion = body.trim();
        if assertion.is_empty() {
            return Err(AuthError::MalformedResponse("empty assertion".to_string()));
        }
        Ok(assertion.to_string())
    }
}

/// Where the assertion exchanged for a token comes from.
pub enum AssertionSource {
    /// Pre-built assertion supplied by the user
    Provided(String),
    /// Freshly signed for every token request
    Signed {
        signer: Box<dyn AssertionSigner>,
        request: AssertionRequest,
    },
}

impl std::fmt::Debug for AssertionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provided(_) => f.write_str("Provided(..)"),
            Self::Signed { request, .. } => f
                .debug_struct("Signed")
                .field("client_id", &request.client_id)
                .field("user_id", &request.user_id)
                .finish_non_exhaustive(),
        }
    }
}

/// OAuth2 SAML-bearer token exchange.
#[derive(Debug)]
pub struct OAuthTokenSource {
    http: HttpClient,
    token_url: Url,
    client_id: String,
    company_id: String,
    assertion: AssertionSource,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OAuthTokenSource {
    pub fn new(
        http: HttpClient,
        token_url: Url,
        client_id: String,
        company_id: String,
        assertion: AssertionSource,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            company_id,
            assertion,
        }
    }

    fn assertion(&self) -> Result<String, AuthError> {
        match &self.assertion {
            AssertionSource::Provided(a) if a.is_empty() => {
                Err(AuthError::MissingInput("assertion_token"))
            }
            AssertionSource::Provided(a) => Ok(a.clone()),
            AssertionSource::Signed { signer, request } => signer.sign(request),
        }
    }
}

impl TokenSource for OAuthTokenSource {
    fn fetch_token(&self) -> Result<String, AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::MissingInput("client_id"));
        }
        if self.company_id.is_empty() {
            return Err(AuthError::MissingInput("company_id"));
        }
        let assertion = self.assertion()?;
        let response = self
            .http
            .post_form(
                &self.token_url,
                &[
                    ("company_id", self.company_id.as_str()),
                    ("client_id", self.client_id.as_str()),
                    ("grant_type", SAML2_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ],
            )
            .map_err(endpoint_unreachable)?;
        let body = checked_body(response)?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::MalformedResponse("empty access_token".to_string()));
        }
        log::debug!("Obtained access token from {}", self.token_url);
        Ok(parsed.access_token)
    }
}

fn endpoint_unreachable(e: TransportError) -> AuthError {
    AuthError::Unreachable(e.to_string())
}

fn checked_body(response: ResponseContainer) -> Result<String, AuthError> {
    if !response.is_success() {
        return Err(AuthError::Rejected {
            status: response.status_code,
            message: response.body_text(),
        });
    }
    Ok(response.body_text())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out `token-1`, `token-2`, ... and counts calls.
    #[derive(Default)]
    pub(crate) struct CountingSource {
        pub calls: Arc<AtomicUsize>,
    }

    impl TokenSource for CountingSource {
        fn fetch_token(&self) -> Result<String, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    struct FailingSource;

    impl TokenSource for FailingSource {
        fn fetch_token(&self) -> Result<String, AuthError> {
            Err(AuthError::Rejected {
                status: 400,
                message: "invalid assertion".to_string(),
            })
        }
    }

    fn manager() -> (TokenManager, Arc<AtomicUsize>, Arc<SharedTokenCache>) {
        let source = CountingSource::default();
        let calls = source.calls.clone();
        let cache = Arc::new(SharedTokenCache::new());
        (TokenManager::with_cache(source, cache.clone()), calls, cache)
    }

    #[test]
    fn lazily_fetches_once() {
        let (mgr, calls, _) = manager();
        assert_eq!(mgr.get_token(false).unwrap(), "token-1");
        assert_eq!(mgr.get_token(false).unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_always_fetches_and_replaces() {
        let (mgr, calls, cache) = manager();
        mgr.get_token(false).unwrap();
        assert_eq!(mgr.get_token(true).unwrap(), "token-2");
        assert_eq!(cache.get().as_deref(), Some("token-2"));
        assert_eq!(mgr.get_token(false).unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refresh_on_empty_cache() {
        let (mgr, calls, _) = manager();
        assert_eq!(mgr.get_token(true).unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_fetch() {
        let (mgr, calls, _) = manager();
        mgr.get_token(false).unwrap();
        mgr.invalidate();
        assert_eq!(mgr.get_token(false).unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_token() {
        let cache = Arc::new(SharedTokenCache::new());
        cache.set("old".to_string());
        let mgr = TokenManager::with_cache(FailingSource, cache.clone());
        assert!(mgr.get_token(true).is_err());
        assert_eq!(cache.get().as_deref(), Some("old"));
        assert_eq!(mgr.get_token(false).unwrap(), "old");
    }

    #[test]
    fn managers_share_injected_cache() {
        let cache: Arc<SharedTokenCache> = Arc::new(SharedTokenCache::new());
        let a = TokenManager::with_cache(CountingSource::default(), cache.clone());
        let b = TokenManager::with_cache(CountingSource::default(), cache.clone());
        let token = a.get_token(false).unwrap();
        assert_eq!(b.get_token(false).unwrap(), token);
    }

    #[test]
    fn concurrent_refreshes_leave_a_valid_token() {
        let (mgr, calls, cache) = manager();
        let mgr = Arc::new(mgr);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        mgr.get_token(true).unwrap();
                        mgr.get_token(false).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 200);
        let last = cache.get().unwrap();
        let n: usize = last.strip_prefix("token-").unwrap().parse().unwrap();
        assert!((1..=200).contains(&n));
    }

    #[test]
    fn idp_url_from_token_url() {
        let token = Url::parse("https://api.example.com/oauth/token").unwrap();
        assert_eq!(
            IdpAssertionSigner::idp_url(&token).as_str(),
            "https://api.example.com/oauth/idp"
        );
        let token = Url::parse("https://api.example.com/oauth/token?x=1").unwrap();
        assert_eq!(
            IdpAssertionSigner::idp_url(&token).as_str(),
            "https://api.example.com/oauth/idp"
        );
    }

    #[test]
    fn empty_provided_assertion_rejected() {
        let http = HttpClient::new(&Default::default()).unwrap();
        let source = OAuthTokenSource::new(
            http,
            Url::parse("https://api.example.com/oauth/token").unwrap(),
            "client".to_string(),
            "company".to_string(),
            AssertionSource::Provided(String::new()),
        );
        assert!(matches!(
            source.fetch_token(),
            Err(AuthError::MissingInput("assertion_token"))
        ));
    }

    #[test]
    fn missing_client_id_rejected_before_network() {
        let http = HttpClient::new(&Default::default()).unwrap();
        let source = OAuthTokenSource::new(
            http,
            Url::parse("https://api.example.com/oauth/token").unwrap(),
            String::new(),
            "company".to_string(),
            AssertionSource::Provided("abc".to_string()),
        );
        assert!(matches!(
            source.fetch_token(),
            Err(AuthError::MissingInput("client_id"))
        ));
    }
}
