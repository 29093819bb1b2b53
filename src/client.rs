//! A cluster API client bound to one resolved context.

use std::path::Path;
use std::sync::Arc;

use reqwest::{Response, StatusCode};

use crate::config::in_cluster::{InClusterConfig, InClusterError};
use crate::config::{Config, ConfigLoadError, ConfigLookupError, ResolvedContext};
use crate::query::{Query, QueryError, QueryResult};
use crate::tls::CertificateError;
use crate::transport::{AuthenticatedTransport, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Lookup(#[from] ConfigLookupError),

    #[error(transparent)]
    Load(#[from] ConfigLoadError),

    #[error(transparent)]
    InCluster(#[from] InClusterError),

    #[error("invalid TLS material: {0}")]
    Certificate(#[from] CertificateError),

    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("API server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to read response body")]
    Body(#[source] reqwest::Error),

    #[error("response body is not valid JSON")]
    Decode(#[source] serde_json::Error),
}

/// Settings for a [`Client`]. Fields are public; unset ones are filled in by
/// [`ClientBuilder::new`].
#[derive(Clone)]
pub struct ClientBuilder {
    pub transport: Arc<dyn Transport>,
    /// Applied over every query the client runs.
    pub defaults: Query,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            defaults: Query::new(),
        }
    }

    pub fn with_defaults(self, defaults: Query) -> Self {
        Self { defaults, ..self }
    }

    pub fn build(self) -> Client {
        Client {
            transport: self.transport,
            defaults: self.defaults,
        }
    }
}

#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    defaults: Query,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Connect to the context's cluster as the context's user.
    pub fn from_context(context: &ResolvedContext) -> Result<Self, ClientError> {
        let transport = AuthenticatedTransport::for_context(context)?;
        tracing::debug!(
            context = context.name(),
            server = %context.cluster().server,
            auth = transport.auth().kind(),
            "Created cluster client"
        );

        Ok(Self::builder(Arc::new(transport))
            .with_defaults(Query::new().host(context.cluster().server.clone()))
            .build())
    }

    /// Load a kubeconfig and connect to `context`, or to its current context
    /// when `None`.
    pub fn from_kubeconfig(path: Option<&Path>, context: Option<&str>) -> Result<Self, ClientError> {
        let config = Config::load_or_default_path(path)?;
        let resolved = match context {
            Some(name) => config.resolve(name)?,
            None => config.resolve_current()?,
        };
        Self::from_context(&resolved)
    }

    /// Connect with the pod's mounted service account.
    pub fn in_cluster() -> Result<Self, ClientError> {
        let context = InClusterConfig::default().load()?;
        Self::from_context(&context)
    }

    pub fn defaults(&self) -> &Query {
        &self.defaults
    }

    /// Send `query` and return the response as is, whatever its status.
    pub async fn execute(&self, query: &Query) -> Result<Response, ClientError> {
        let query = query.clone().overlay(self.defaults.clone());
        let request = query.request()?;
        tracing::debug!(method = %request.method(), url = %request.url(), "Sending request");
        Ok(self.transport.send(request).await?)
    }

    /// Send `query` and decode the JSON body of a successful response.
    pub async fn query(&self, query: &Query) -> Result<QueryResult, ClientError> {
        let response = self.stream(query).await?;
        let body = response.bytes().await.map_err(ClientError::Body)?;
        let value = serde_json::from_slice(&body).map_err(ClientError::Decode)?;
        Ok(QueryResult::new(value))
    }

    /// Send `query` and hand back the successful response unread, e.g. to
    /// consume a watch incrementally.
    pub async fn stream(&self, query: &Query) -> Result<Response, ClientError> {
        let response = self.execute(query).await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, "API request failed");
    Err(ClientError::Status { status, body })
}
