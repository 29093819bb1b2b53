//! Request construction for the cluster API.
//!
//! A [`Query`] is an immutable description of one API call. Every builder
//! method returns a new query; unset fields fall back to defaults when the
//! request is built. Two queries compose with [`Query::overlay`], where the
//! later query's fields win and parameters/headers accumulate.
//!
//! ```
//! use kubebind::query::Query;
//!
//! let query = Query::pod("").namespace("web").label("app", "nginx");
//! assert_eq!(query.path(), "/api/v1/namespaces/web/pods");
//! ```

mod path;
mod result;

pub use path::{FieldPath, Shape};
pub use result::{ExtractError, Extracted, QueryResult};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use serde_json::{json, Value};

pub const DEFAULT_HOST: &str = "http://localhost";
pub const DEFAULT_API_VERSION: &str = "/api/v1";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid API host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("failed to encode request body")]
    Body(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    method: Option<Method>,
    host: Option<String>,
    api_version: Option<String>,
    namespace: Option<String>,
    resource_type: Option<String>,
    resource: Option<String>,
    subresource: Option<String>,
    labels: Vec<(String, String)>,
    params: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pods in the query's namespace. An empty name lists them.
    pub fn pod(name: &str) -> Self {
        Self::new().resource("pods", name)
    }

    /// A cluster-scoped node.
    pub fn node(name: &str) -> Self {
        Self::new().namespace("").resource("nodes", name)
    }

    pub fn deployment(name: &str) -> Self {
        Self::new()
            .api_version("/apis/apps/v1")
            .resource("deployments", name)
    }

    /// A cluster-scoped persistent volume.
    pub fn persistent_volume(name: &str) -> Self {
        Self::new().namespace("").resource("persistentvolumes", name)
    }

    /// Evict a pod through the eviction subresource.
    ///
    /// The body's namespace is filled in when the request is built, so a
    /// later [`namespace`](Self::namespace) call still applies.
    pub fn eviction(pod: &str) -> Self {
        Self::new()
            .method(Method::POST)
            .resource("pods", pod)
            .subresource("eviction")
            .json(json!({
                "apiVersion": "policy/v1",
                "kind": "Eviction",
                "metadata": { "name": pod },
            }))
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// API prefix, e.g. `/api/v1` or `/apis/apps/v1`.
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// An empty namespace addresses cluster-scoped resources.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource = Some(name.into());
        self
    }

    pub fn subresource(mut self, subresource: impl Into<String>) -> Self {
        self.subresource = Some(subresource.into());
        self
    }

    /// Add an equality requirement to the label selector.
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Ask the API server for a stream of change events.
    pub fn watch(self) -> Self {
        self.param("watch", "true")
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Authorize this single query with a bearer token.
    pub fn bearer(self, token: &str) -> Result<Self, QueryError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            QueryError::InvalidHeader {
                name: AUTHORIZATION.to_string(),
            }
        })?;
        value.set_sensitive(true);
        Ok(self.header(AUTHORIZATION, value))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Compose with a later query. Fields set on `later` win; labels,
    /// parameters and headers from both are kept, earlier ones first.
    pub fn overlay(mut self, later: Query) -> Self {
        self.method = later.method.or(self.method);
        self.host = later.host.or(self.host);
        self.api_version = later.api_version.or(self.api_version);
        self.namespace = later.namespace.or(self.namespace);
        self.resource_type = later.resource_type.or(self.resource_type);
        self.resource = later.resource.or(self.resource);
        self.subresource = later.subresource.or(self.subresource);
        self.body = later.body.or(self.body);
        self.labels.extend(later.labels);
        self.params.extend(later.params);
        for (name, value) in later.headers.iter() {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn effective_method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }

    pub fn effective_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn effective_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The API path, without host or query string.
    pub fn path(&self) -> String {
        let api = self
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_API_VERSION)
            .trim_end_matches('/');
        let mut path = String::from(api);

        let namespace = self.effective_namespace();
        if !namespace.is_empty() {
            path.push_str("/namespaces/");
            path.push_str(namespace);
        }

        for segment in [&self.resource_type, &self.resource, &self.subresource]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
        {
            path.push('/');
            path.push_str(segment);
        }

        path
    }

    /// The label selector, e.g. `app=nginx,tier=web`.
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn url(&self) -> Result<Url, QueryError> {
        let host = self.effective_host();
        let mut url = Url::parse(host).map_err(|e| QueryError::InvalidHost {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(QueryError::InvalidHost {
                host: host.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{}", self.path()));

        let selector = self.label_selector();
        if selector.is_some() || !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(selector) = &selector {
                pairs.append_pair("labelSelector", selector);
            }
            for (k, v) in &self.params {
                pairs.append_pair(k, v);
            }
        }

        Ok(url)
    }

    pub fn request(&self) -> Result<Request, QueryError> {
        let mut request = Request::new(self.effective_method(), self.url()?);
        *request.headers_mut() = self.headers.clone();

        if let Some(body) = &self.body {
            let body = self.with_body_namespace(body.clone());
            let bytes = serde_json::to_vec(&body).map_err(QueryError::Body)?;
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(bytes.into());
        }

        Ok(request)
    }

    // Eviction bodies carry the namespace of the pod they target.
    fn with_body_namespace(&self, mut body: Value) -> Value {
        let is_eviction = body.get("kind").and_then(Value::as_str) == Some("Eviction");
        let namespace = self.effective_namespace();
        if is_eviction && !namespace.is_empty() {
            if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata
                    .entry("namespace")
                    .or_insert_with(|| Value::String(namespace.to_string()));
            }
        }
        body
    }
}
