//! Connection, extraction and retry settings.
//!
//! Each section deserializes from its own TOML table and validates itself by
//! appending to a shared list of [`ConfigFailure`]s, so every problem in a
//! file is reported in one go.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ConfigFailure, TransportError};
use crate::http::{HttpClient, ProxySettings, parse_url};
use crate::partition::PlanRequest;
use crate::retry::{RetryPolicy, RetryingTransport};
use crate::token::{
    AssertionRequest, AssertionSource, IdpAssertionSigner, OAuthTokenSource, TokenManager,
};
use crate::transport::{AuthenticatedTransport, Credentials};
use crate::urls::EntityQuery;

/// Default validity requested for generated assertions (one day)
pub const DEFAULT_EXPIRE_IN_MINUTES: u32 = 1440;

/// Transport stack used for every service call.
pub type ServiceTransport = RetryingTransport<AuthenticatedTransport<HttpClient>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "basicAuth")]
    Basic,
    #[serde(rename = "oAuth2")]
    OAuth2,
}

/// How the OAuth assertion is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AssertionMode {
    /// User pastes a pre-built assertion
    #[serde(rename = "enterToken")]
    Enter,
    /// Assertion is generated from the private key for every token request
    #[default]
    #[serde(rename = "createToken")]
    Create,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub auth_type: AuthType,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
    pub token_url: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub client_id: Option<String>,
    pub company_id: Option<String>,
    pub user_id: Option<String>,
    pub assertion_mode: AssertionMode,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub assertion_token: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub private_key: Option<String>,
    pub expire_in_minutes: u32,
    pub proxy_url: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub proxy_username: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub proxy_password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_type: AuthType::default(),
            username: None,
            password: None,
            token_url: None,
            client_id: None,
            company_id: None,
            user_id: None,
            assertion_mode: AssertionMode::default(),
            assertion_token: None,
            private_key: None,
            expire_in_minutes: DEFAULT_EXPIRE_IN_MINUTES,
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn text(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().trim().to_string()
}

fn missing(failures: &mut Vec<ConfigFailure>, field: &'static str) {
    failures.push(ConfigFailure {
        field,
        message: "required value is missing".to_string(),
    });
}

fn check_http_url(failures: &mut Vec<ConfigFailure>, field: &'static str, raw: &str) {
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => failures.push(ConfigFailure {
            field,
            message: format!("unsupported scheme `{}`", url.scheme()),
        }),
        Err(e) => failures.push(ConfigFailure {
            field,
            message: format!("invalid URL `{raw}`: {e}"),
        }),
    }
}

impl ConnectionConfig {
    pub fn validate(&self, failures: &mut Vec<ConfigFailure>) {
        match self.auth_type {
            AuthType::Basic => {
                if is_blank(&self.username) {
                    missing(failures, "connection.username");
                }
                if is_blank(&self.password) {
                    missing(failures, "connection.password");
                }
            }
            AuthType::OAuth2 => self.validate_oauth(failures),
        }

        if self.base_url.trim().is_empty() {
            missing(failures, "connection.base_url");
        } else {
            check_http_url(failures, "connection.base_url", self.base_url.trim());
        }
    }

    fn validate_oauth(&self, failures: &mut Vec<ConfigFailure>) {
        if is_blank(&self.client_id) {
            missing(failures, "connection.client_id");
        }
        if is_blank(&self.company_id) {
            missing(failures, "connection.company_id");
        }
        if is_blank(&self.token_url) {
            missing(failures, "connection.token_url");
        } else {
            check_http_url(failures, "connection.token_url", &text(&self.token_url));
        }

        match self.assertion_mode {
            AssertionMode::Enter => {
                if is_blank(&self.assertion_token) {
                    missing(failures, "connection.assertion_token");
                }
            }
            AssertionMode::Create => {
                if is_blank(&self.private_key) {
                    missing(failures, "connection.private_key");
                }
                if self.expire_in_minutes == 0 {
                    failures.push(ConfigFailure {
                        field: "connection.expire_in_minutes",
                        message: "must be greater than 0".to_string(),
                    });
                }
                if is_blank(&self.user_id) {
                    missing(failures, "connection.user_id");
                }
            }
        }
    }

    pub fn proxy(&self) -> ProxySettings {
        ProxySettings {
            url: self.proxy_url.clone(),
            username: self.proxy_username.clone(),
            password: self.proxy_password.clone(),
        }
    }

    /// Credentials for every call. OAuth2 tokens go through the process-wide cache.
    pub fn credentials(&self, http: &HttpClient) -> Result<Credentials, TransportError> {
        match self.auth_type {
            AuthType::Basic => Ok(Credentials::Basic {
                username: text(&self.username),
                password: self.password.clone().unwrap_or_default(),
            }),
            AuthType::OAuth2 => {
                let token_url = parse_url(&text(&self.token_url))?;
                let assertion = match self.assertion_mode {
                    AssertionMode::Enter => AssertionSource::Provided(text(&self.assertion_token)),
                    AssertionMode::Create => AssertionSource::Signed {
                        signer: Box::new(IdpAssertionSigner::new(http.clone())),
                        request: AssertionRequest {
                            token_url: token_url.clone(),
                            client_id: text(&self.client_id),
                            company_id: text(&self.company_id),
                            user_id: text(&self.user_id),
                            private_key: text(&self.private_key),
                            expire_in_minutes: self.expire_in_minutes,
                        },
                    },
                };
                let source = OAuthTokenSource::new(
                    http.clone(),
                    token_url,
                    text(&self.client_id),
                    text(&self.company_id),
                    assertion,
                );
                Ok(Credentials::Bearer(Arc::new(TokenManager::new(source))))
            }
        }
    }

    /// Full transport stack: retry around authentication around HTTP.
    pub fn connect(&self) -> Result<ServiceTransport, TransportError> {
        let http = HttpClient::new(&self.proxy())?;
        let credentials = self.credentials(&http)?;
        Ok(RetryingTransport::new(AuthenticatedTransport::new(
            http,
            credentials,
        )))
    }
}

/// What to extract and how to partition it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub entity: String,
    pub associated_entity: Option<String>,
    pub filter: Option<String>,
    pub select: Option<String>,
    pub expand: Option<String>,
    pub default_fields: Vec<String>,
    pub skip: u64,
    pub fetch: u64,
    pub split_count: u64,
    pub batch_size: u64,
}

impl ExtractConfig {
    pub fn validate(&self, failures: &mut Vec<ConfigFailure>) {
        let entity = self.entity.trim();
        if entity.is_empty() {
            missing(failures, "extract.entity");
        } else if entity.contains('(') && entity.contains(')') {
            failures.push(ConfigFailure {
                field: "extract.entity",
                message: "key predicates such as `Products(2)` are not supported".to_string(),
            });
        }
        if !is_blank(&self.associated_entity) && is_blank(&self.expand) {
            failures.push(ConfigFailure {
                field: "extract.associated_entity",
                message: "an associated entity requires an expand option".to_string(),
            });
        }
    }

    pub fn query(&self) -> EntityQuery {
        EntityQuery {
            entity: self.entity.trim().to_string(),
            associated_entity: self.associated_entity.clone(),
            filter: self.filter.clone(),
            select: self.select.clone(),
            expand: self.expand.clone(),
            default_fields: self.default_fields.clone(),
        }
    }

    pub fn plan_request(&self, available: u64) -> PlanRequest {
        PlanRequest {
            available,
            fetch: self.fetch,
            skip: self.skip,
            split_count: self.split_count,
            batch_size: self.batch_size,
        }
    }
}

/// Backoff tuning, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: u32,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            initial_delay_secs: policy.initial_delay.as_secs(),
            max_delay_secs: policy.max_delay.as_secs(),
            multiplier: policy.multiplier,
            max_retries: policy.max_retries,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self, failures: &mut Vec<ConfigFailure>) {
        let mut fail = |field, message: &str| {
            failures.push(ConfigFailure {
                field,
                message: message.to_string(),
            })
        };
        if self.initial_delay_secs == 0 {
            fail("retry.initial_delay_secs", "must be greater than 0");
        }
        if self.max_delay_secs == 0 {
            fail("retry.max_delay_secs", "must be greater than 0");
        }
        if self.max_retries == 0 {
            fail("retry.max_retries", "must be greater than 0");
        }
        if self.multiplier <= 1 {
            fail("retry.multiplier", "must be strictly greater than 1");
        }
        if self.max_delay_secs <= self.initial_delay_secs {
            fail(
                "retry.max_delay_secs",
                "must be greater than the initial delay",
            );
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            multiplier: self.multiplier,
            max_retries: self.max_retries,
        }
    }
}

/// Validate all three sections together.
pub fn validate(
    connection: &ConnectionConfig,
    extract: &ExtractConfig,
    retry: &RetryConfig,
) -> Result<(), ConfigError> {
    let mut failures = Vec::new();
    connection.validate(&mut failures);
    extract.validate(&mut failures);
    retry.validate(&mut failures);
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ConfigError { failures })
    }
}

/// Deserialize a string that may be an environment reference like `${VAR}`
pub fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand `${VAR}` to the variable's value; other strings pass through.
pub fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}
