//! Service-level operations: connection check, record count, data pages.

use serde::Deserialize;

use crate::error::ServiceError;
use crate::http::{APPLICATION_JSON, APPLICATION_XML, ResponseContainer, TEXT_PLAIN};
use crate::partition::Page;
use crate::retry::{RetryPolicy, RetryingTransport};
use crate::transport::Transport;
use crate::urls::ServiceUrls;

const UNAUTHORIZED: u16 = 401;
const NOT_FOUND: u16 = 404;

/// Upper bound on how much of an error body ends up in a message
const ERROR_BODY_LIMIT: usize = 512;

/// One entity set on a remote OData service.
#[derive(Debug)]
pub struct ODataService<T> {
    urls: ServiceUrls,
    transport: RetryingTransport<T>,
    policy: RetryPolicy,
}

impl<T: Transport> ODataService<T> {
    pub fn new(urls: ServiceUrls, transport: RetryingTransport<T>, policy: RetryPolicy) -> Self {
        Self {
            urls,
            transport,
            policy,
        }
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    pub fn transport(&self) -> &RetryingTransport<T> {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Single unretried GET of the base URL.
    ///
    /// 401 and 404 are reported as bad credentials and bad base URL; any
    /// other status means the service is reachable.
    pub fn check_connection(&self) -> Result<ResponseContainer, ServiceError> {
        let response = self
            .transport
            .inner()
            .call(self.urls.base(), APPLICATION_JSON)?;
        match response.status_code {
            UNAUTHORIZED => Err(ServiceError::InvalidCredentials),
            NOT_FOUND => Err(ServiceError::NotFound),
            status => {
                log::info!(
                    "Connected to {} (HTTP {status}, data service version {})",
                    self.urls.base(),
                    response.service_version.as_deref().unwrap_or("unknown")
                );
                Ok(response)
            }
        }
    }

    /// Total records matching the configured filter.
    pub fn available_record_count(&self) -> Result<u64, ServiceError> {
        let response = self.get("record count", &self.urls.count(), TEXT_PLAIN)?;
        let body = response.body_text();
        let count = body
            .trim()
            .parse::<u64>()
            .map_err(|_| ServiceError::InvalidCount(body.trim().to_string()))?;
        log::info!("{} records available in {}", count, self.urls.query().entity);
        Ok(count)
    }

    /// Names of the entity sets the service exposes, from its JSON service
    /// document. Both the V2 `{"d":{"EntitySets":[..]}}` and the bare
    /// `{"EntitySets":[..]}` shapes are accepted.
    pub fn list_entities(&self) -> Result<Vec<String>, ServiceError> {
        let response = self.get("entity sets", self.urls.base(), APPLICATION_JSON)?;
        let document: ServiceDocument = serde_json::from_slice(&response.body)
            .map_err(|e| ServiceError::InvalidEntityList(e.to_string()))?;
        let sets = match document {
            ServiceDocument::Wrapped { d } => d.entity_sets,
            ServiceDocument::Bare(sets) => sets.entity_sets,
        };
        log::info!("{} entity sets at {}", sets.len(), self.urls.base());
        Ok(sets)
    }

    /// Raw `$metadata` document for the entity (and associated entity).
    pub fn metadata(&self) -> Result<ResponseContainer, ServiceError> {
        self.get("metadata", &self.urls.metadata(), APPLICATION_XML)
    }

    /// One `$top=1` probe with every configured query option applied.
    pub fn probe(&self) -> Result<ResponseContainer, ServiceError> {
        self.get("probe", &self.urls.tester(), APPLICATION_JSON)
    }

    pub fn fetch_page(&self, page: Page) -> Result<ResponseContainer, ServiceError> {
        self.get("data page", &self.urls.data(page), APPLICATION_JSON)
    }

    fn get(
        &self,
        operation: &'static str,
        endpoint: &reqwest::Url,
        accept: &str,
    ) -> Result<ResponseContainer, ServiceError> {
        let response = self
            .transport
            .call_with_retry(endpoint, accept, &self.policy)?;
        if !response.is_success() {
            return Err(ServiceError::UnexpectedStatus {
                operation,
                status: response.status_code,
                message: error_message(&response),
            });
        }
        Ok(response)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServiceDocument {
    Wrapped { d: EntitySets },
    Bare(EntitySets),
}

#[derive(Deserialize)]
struct EntitySets {
    #[serde(rename = "EntitySets")]
    entity_sets: Vec<String>,
}

#[derive(Deserialize)]
struct ODataErrorBody {
    error: ODataError,
}

#[derive(Deserialize)]
struct ODataError {
    #[serde(default)]
    code: Option<String>,
    message: ODataErrorMessage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ODataErrorMessage {
    Text(String),
    Localized { value: String },
}

/// Human-readable reason for a failed call: the OData error message when the
/// body carries one, else the (truncated) body or the status text.
fn error_message(response: &ResponseContainer) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ODataErrorBody>(&response.body) {
        let text = match parsed.error.message {
            ODataErrorMessage::Text(t) | ODataErrorMessage::Localized { value: t } => t,
        };
        return match parsed.error.code {
            Some(code) => format!("{code}: {text}"),
            None => text,
        };
    }
    let body = response.body_text();
    let body = body.trim();
    if body.is_empty() {
        return response.status_message.clone();
    }
    let mut end = body.len().min(ERROR_BODY_LIMIT);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
