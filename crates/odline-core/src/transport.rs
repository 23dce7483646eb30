//! Authenticated single-call transport.
//!
//! [`AuthenticatedTransport`] attaches Basic or Bearer credentials to each
//! request. With Bearer auth a 403 triggers exactly one token refresh and one
//! resend; whatever comes back from the resend is returned as is.

use std::sync::Arc;

use reqwest::Url;

use crate::error::TransportError;
use crate::http::{Authorization, RequestSender, ResponseContainer};
use crate::token::TokenManager;

const FORBIDDEN: u16 = 403;

/// One GET against the remote service.
pub trait Transport: Send + Sync {
    fn call(&self, endpoint: &Url, accept: &str) -> Result<ResponseContainer, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, endpoint: &Url, accept: &str) -> Result<ResponseContainer, TransportError> {
        (**self).call(endpoint, accept)
    }
}

/// Authentication scheme for every call.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(Arc<TokenManager>),
}

/// [`Transport`] that authenticates through a [`RequestSender`].
#[derive(Debug)]
pub struct AuthenticatedTransport<S> {
    sender: S,
    credentials: Credentials,
}

impl<S: RequestSender> AuthenticatedTransport<S> {
    pub fn new(sender: S, credentials: Credentials) -> Self {
        Self {
            sender,
            credentials,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn call_with_bearer(
        &self,
        tokens: &TokenManager,
        endpoint: &Url,
        accept: &str,
    ) -> Result<ResponseContainer, TransportError> {
        let token = tokens.get_token(false)?;
        let response = self
            .sender
            .send(endpoint, accept, &Authorization::Bearer(token))?;
        if response.status_code != FORBIDDEN {
            return Ok(response);
        }

        log::info!("Access token rejected (HTTP 403), refreshing");
        let token = tokens.get_token(true)?;
        self.sender
            .send(endpoint, accept, &Authorization::Bearer(token))
    }
}

impl<S: RequestSender> Transport for AuthenticatedTransport<S> {
    fn call(&self, endpoint: &Url, accept: &str) -> Result<ResponseContainer, TransportError> {
        match &self.credentials {
            Credentials::Basic { username, password } => {
                let auth = Authorization::Basic {
                    username: username.clone(),
                    password: password.clone(),
                };
                self.sender.send(endpoint, accept, &auth)
            }
            Credentials::Bearer(tokens) => self.call_with_bearer(tokens, endpoint, accept),
        }
    }
}
