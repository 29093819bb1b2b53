//! Request transports.
//!
//! [`Transport`] is the seam between request construction and the network.
//! [`AuthenticatedTransport`] layers cluster authentication on top of another
//! transport: TLS material is installed once on the underlying HTTP client,
//! and bearer tokens (static or exec-issued) are injected per request.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use secrecy::{ExposeSecret, SecretString};

use crate::client::ClientError;
use crate::config::ResolvedContext;
use crate::credentials::{CredentialCache, CredentialError, ExecPluginRunner};
use crate::tls::TlsMaterial;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The exec plugin could not issue a credential for this request.
    #[error("failed to obtain credential: {0}")]
    Credential(#[from] CredentialError),

    #[error("bearer token contains characters not allowed in a header")]
    InvalidToken,

    /// The underlying HTTP request failed; passed through as is.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Sends a fully built request and returns the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        Ok(self.execute(request).await?)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        (**self).send(request).await
    }
}

/// How requests are authorized.
#[derive(Clone, Default)]
pub enum Auth {
    /// Nothing beyond whatever client certificate the TLS layer presents.
    #[default]
    None,
    /// A fixed bearer token.
    Token(SecretString),
    /// A bearer token issued by an exec plugin.
    Exec(CredentialCache),
}

impl Auth {
    /// Pick the auth mode a user declares. Exec wins over a static token.
    pub fn for_user(user: &crate::config::User) -> Self {
        if let Some(exec) = &user.exec {
            return Auth::Exec(CredentialCache::new(ExecPluginRunner::new(exec.clone())));
        }
        match user.static_token() {
            Some(token) => Auth::Token(SecretString::from(token.to_string())),
            None => Auth::None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Auth::None => "none",
            Auth::Token(_) => "token",
            Auth::Exec(_) => "exec",
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Injects the Authorization header and forwards to `inner`.
///
/// Failed sends are not retried.
pub struct AuthenticatedTransport<T = reqwest::Client> {
    inner: T,
    auth: Auth,
}

impl<T: Transport> AuthenticatedTransport<T> {
    pub fn new(inner: T, auth: Auth) -> Self {
        Self { inner, auth }
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    async fn authorization(&self) -> Result<Option<HeaderValue>, TransportError> {
        let token = match &self.auth {
            Auth::None => return Ok(None),
            Auth::Token(token) => token.clone(),
            Auth::Exec(cache) => cache.get().await?.token().clone(),
        };

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| TransportError::InvalidToken)?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

impl AuthenticatedTransport<reqwest::Client> {
    /// Build an HTTP client carrying the context's TLS material, authorized as
    /// the context's user.
    ///
    /// Certificate problems abort construction.
    pub fn for_context(context: &ResolvedContext) -> Result<Self, ClientError> {
        let tls = TlsMaterial::load(context)?;
        tracing::debug!(context = context.name(), tls = ?tls, "Building cluster transport");

        let builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        let client = tls.apply(builder).build().map_err(ClientError::HttpClient)?;

        Ok(Self::new(client, Auth::for_user(context.user())))
    }
}

#[async_trait]
impl<T: Transport> Transport for AuthenticatedTransport<T> {
    async fn send(&self, mut request: Request) -> Result<Response, TransportError> {
        if let Some(value) = self.authorization().await? {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        self.inner.send(request).await
    }
}
