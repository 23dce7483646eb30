//! Blocking HTTP access to the remote service.
//!
//! Uses async reqwest internally on a shared tokio runtime, but presents a
//! sync interface so rayon workers can call it directly.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Proxy, Url};

use crate::error::TransportError;

/// Connect and read timeout. Enterprise gateways can take minutes on large pages.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Response header carrying the OData protocol version
pub const SERVICE_VERSION_HEADER: &str = "dataserviceversion";

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_PLAIN: &str = "text/plain";

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Normalized result of one HTTP call. The body is read eagerly so the
/// connection goes back to the pool before the caller looks at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContainer {
    pub status_code: u16,
    pub status_message: String,
    pub service_version: Option<String>,
    pub body: Vec<u8>,
}

impl ResponseContainer {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Credentials attached to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Proxy routing for all outgoing requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Sends one GET with the given credentials. [`HttpClient`] is the real
/// implementation; tests substitute scripted fakes.
pub trait RequestSender: Send + Sync {
    fn send(
        &self,
        endpoint: &Url,
        accept: &str,
        auth: &Authorization,
    ) -> Result<ResponseContainer, TransportError>;
}

impl<S: RequestSender + ?Sized> RequestSender for std::sync::Arc<S> {
    fn send(
        &self,
        endpoint: &Url,
        accept: &str,
        auth: &Authorization,
    ) -> Result<ResponseContainer, TransportError> {
        (**self).send(endpoint, accept, auth)
    }
}

/// Pooled HTTP client configured with timeouts and optional proxy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(proxy: &ProxySettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .read_timeout(CONNECTION_TIMEOUT)
            .pool_max_idle_per_host(8);

        if let Some(proxy_url) = proxy.url.as_deref().filter(|u| !u.is_empty()) {
            let mut p = Proxy::all(proxy_url).map_err(|e| TransportError::InvalidUrl {
                url: proxy_url.to_string(),
                reason: e.to_string(),
            })?;
            if let (Some(user), Some(pass)) = (
                proxy.username.as_deref().filter(|s| !s.is_empty()),
                proxy.password.as_deref().filter(|s| !s.is_empty()),
            ) {
                p = p.basic_auth(user, pass);
            }
            log::debug!("Routing requests through proxy {proxy_url}");
            builder = builder.proxy(p);
        }

        let inner = builder.build().map_err(TransportError::from_reqwest)?;
        Ok(Self { inner })
    }

    /// POST an urlencoded form. Used by the token and assertion endpoints.
    pub fn post_form(
        &self,
        endpoint: &Url,
        form: &[(&str, &str)],
    ) -> Result<ResponseContainer, TransportError> {
        let request = self
            .inner
            .post(endpoint.clone())
            .header(ACCEPT, APPLICATION_JSON)
            .form(form);
        SHARED_RUNTIME
            .handle()
            .block_on(async { read_response(request.send().await).await })
    }
}

impl RequestSender for HttpClient {
    fn send(
        &self,
        endpoint: &Url,
        accept: &str,
        auth: &Authorization,
    ) -> Result<ResponseContainer, TransportError> {
        let request = self.inner.get(endpoint.clone()).header(ACCEPT, accept);
        let request = match auth {
            Authorization::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
        };
        SHARED_RUNTIME
            .handle()
            .block_on(async { read_response(request.send().await).await })
    }
}

async fn read_response(
    sent: Result<reqwest::Response, reqwest::Error>,
) -> Result<ResponseContainer, TransportError> {
    let response = sent.map_err(TransportError::from_reqwest)?;
    let status = response.status();
    let service_version = response
        .headers()
        .get(SERVICE_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response
        .bytes()
        .await
        .map_err(TransportError::from_reqwest)?;
    Ok(ResponseContainer {
        status_code: status.as_u16(),
        status_message: status.canonical_reason().unwrap_or_default().to_string(),
        service_version,
        body: body.to_vec(),
    })
}

/// Parse a URL, reporting the offending input on failure.
pub fn parse_url(raw: &str) -> Result<Url, TransportError> {
    Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
