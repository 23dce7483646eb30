//! odline core: parallel extraction from OData services.
//!
//! The pieces, bottom up:
//! - [`partition`] plans balanced `$skip`/`$top` splits over a record range
//! - [`http`] performs blocking GETs over a shared async client
//! - [`transport`] adds Basic or Bearer auth with a one-shot 403 token refresh
//! - [`retry`] retries 5xx and I/O failures with exponential backoff
//! - [`token`] caches the bearer token process-wide
//! - [`service`] and [`urls`] speak the OData endpoints
//! - [`extract`] runs splits on rayon workers and writes pages to disk

pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod logging;
pub mod manifest;
pub mod partition;
pub mod progress;
pub mod retry;
pub mod service;
pub mod shutdown;
pub mod token;
pub mod transport;
pub mod urls;
pub mod work_queue;

pub use config::{
    AssertionMode, AuthType, ConnectionConfig, ExtractConfig, RetryConfig, ServiceTransport,
};
pub use error::{AuthError, ConfigError, ConfigFailure, PlanError, ServiceError, TransportError};
pub use extract::ExtractOptions;
pub use http::{HttpClient, ProxySettings, ResponseContainer, SHARED_RUNTIME};
pub use logging::{IndicatifLogger, init_logging};
pub use manifest::{ExtractManifest, SplitOutcome, SplitRecord};
pub use partition::{Page, PlanLimits, PlanRequest, Planner, Split, plan};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::{RetryPolicy, RetryingTransport};
pub use service::ODataService;
pub use shutdown::{install_signal_handlers, is_shutdown_requested, shutdown_flag};
pub use token::{SharedTokenCache, TokenCache, TokenManager, TokenSource};
pub use transport::{AuthenticatedTransport, Credentials, Transport};
pub use urls::{EntityQuery, ServiceUrls};
