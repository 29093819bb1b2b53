//! Kubeconfig model and context resolution.
//!
//! A kubeconfig names three kinds of records: clusters (where to connect and
//! which CA to trust), users (how to authenticate) and contexts (a pairing of
//! one cluster with one user). Resolving a context binds those names to the
//! actual records and yields an immutable [`ResolvedContext`].
//!
//! ```yaml
//! current-context: prod
//! clusters:
//!   - name: prod-cluster
//!     cluster:
//!       server: https://10.0.0.1:6443
//!       certificate-authority-data: LS0tLS1CRUdJTi...
//! users:
//!   - name: alice
//!     user:
//!       exec:
//!         command: issue-token
//!         args: ["--cluster", "prod"]
//! contexts:
//!   - name: prod
//!     context:
//!       cluster: prod-cluster
//!       user: alice
//! ```

pub mod in_cluster;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

pub use in_cluster::{InClusterConfig, InClusterError};

/// A context, user or cluster name that the kubeconfig does not define.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigLookupError {
    #[error("context {0:?} not found in kubeconfig")]
    ContextNotFound(String),
    #[error("user {0:?} not found in kubeconfig")]
    UserNotFound(String),
    #[error("cluster {0:?} not found in kubeconfig")]
    ClusterNotFound(String),
    #[error("kubeconfig has no current-context")]
    NoCurrentContext,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read kubeconfig {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse kubeconfig {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse kubeconfig")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where to connect and which certificate authority to trust.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,

    /// Base64-encoded PEM bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,

    /// Path to a PEM bundle on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<PathBuf>,
}

/// Client credential material.
///
/// At most one source is used: exec, then inline certificate data, then
/// certificate files, then a static token. Half-specified certificate pairs
/// count as absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct User {
    /// Base64-encoded PEM client certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,

    /// Base64-encoded PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,

    /// Static bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
}

impl User {
    /// Inline data counts only when both halves are non-empty.
    pub fn has_cert_data(&self) -> bool {
        non_empty(&self.client_certificate_data).is_some()
            && non_empty(&self.client_key_data).is_some()
    }

    /// File paths count only when both halves are non-empty.
    pub fn has_cert_files(&self) -> bool {
        non_empty_path(&self.client_certificate).is_some()
            && non_empty_path(&self.client_key).is_some()
    }

    /// The static token, if one is configured and non-empty.
    pub fn static_token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    /// A short label for the authentication mode, safe to print.
    pub fn auth_kind(&self) -> &'static str {
        if self.exec.is_some() {
            "exec"
        } else if self.has_cert_data() {
            "client-certificate-data"
        } else if self.has_cert_files() {
            "client-certificate"
        } else if self.static_token().is_some() {
            "token"
        } else {
            "none"
        }
    }
}

// Keys and tokens stay out of logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("client_certificate_data", &self.client_certificate_data.is_some())
            .field("client_key_data", &self.client_key_data.as_ref().map(|_| "[REDACTED]"))
            .field("client_certificate", &self.client_certificate)
            .field("client_key", &self.client_key)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("exec", &self.exec)
            .finish()
    }
}

/// An external command that prints an `ExecCredential` on stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides, merged over the ambient environment.
    ///
    /// Accepts either a plain mapping or kubeconfig's `[{name, value}]` list.
    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvRepr {
    Map(BTreeMap<String, String>),
    List(Vec<EnvVar>),
}

#[derive(Deserialize)]
struct EnvVar {
    name: String,
    #[serde(default)]
    value: String,
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<EnvRepr>::deserialize(deserializer)?;
    Ok(match repr {
        None => BTreeMap::new(),
        Some(EnvRepr::Map(map)) => map,
        Some(EnvRepr::List(list)) => list.into_iter().map(|v| (v.name, v.value)).collect(),
    })
}

/// A pure name binding of one cluster and one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub cluster: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: Context,
}

/// A parsed kubeconfig. Lookups use exact name matches; the first entry wins
/// when a name is repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub current_context: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
}

impl Config {
    /// Parse a kubeconfig document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a kubeconfig from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, otherwise from [`default_config_path`].
    pub fn load_or_default_path(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load(&default_config_path()),
        }
    }

    pub fn lookup_cluster(&self, name: &str) -> Result<&Cluster, ConfigLookupError> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cluster)
            .ok_or_else(|| ConfigLookupError::ClusterNotFound(name.to_string()))
    }

    pub fn lookup_user(&self, name: &str) -> Result<&User, ConfigLookupError> {
        self.users
            .iter()
            .find(|u| u.name == name)
            .map(|u| &u.user)
            .ok_or_else(|| ConfigLookupError::UserNotFound(name.to_string()))
    }

    pub fn lookup_context(&self, name: &str) -> Result<&Context, ConfigLookupError> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| ConfigLookupError::ContextNotFound(name.to_string()))
    }

    /// Bind a context's cluster and user names to their records.
    ///
    /// Checks run context, then user, then cluster; the first missing name
    /// decides the error.
    pub fn resolve(&self, context_name: &str) -> Result<ResolvedContext, ConfigLookupError> {
        let context = self.lookup_context(context_name)?;
        let user = self.lookup_user(&context.user)?;
        let cluster = self.lookup_cluster(&context.cluster)?;

        tracing::debug!(
            context = context_name,
            cluster = %context.cluster,
            user = %context.user,
            "Resolved kubeconfig context"
        );

        Ok(ResolvedContext {
            name: context_name.to_string(),
            cluster_name: context.cluster.clone(),
            cluster: cluster.clone(),
            user_name: context.user.clone(),
            user: user.clone(),
            namespace: context.namespace.clone().filter(|ns| !ns.is_empty()),
        })
    }

    /// Resolve the context named by `current-context`.
    pub fn resolve_current(&self) -> Result<ResolvedContext, ConfigLookupError> {
        if self.current_context.is_empty() {
            return Err(ConfigLookupError::NoCurrentContext);
        }
        self.resolve(&self.current_context)
    }
}

/// A context with its cluster and user records bound. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    name: String,
    cluster_name: String,
    cluster: Cluster,
    user_name: String,
    user: User,
    namespace: Option<String>,
}

impl ResolvedContext {
    /// Build a resolved context directly, bypassing a kubeconfig.
    pub fn new(name: impl Into<String>, cluster: Cluster, user: User) -> Self {
        let name = name.into();
        Self {
            cluster_name: name.clone(),
            user_name: name.clone(),
            name,
            cluster,
            user,
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// The namespace the context selects, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// Returns the default kubeconfig path.
///
/// Resolution order:
/// 1. the first entry of `$KUBECONFIG`
/// 2. `~/.kube/config`
/// 3. `.kube/config` relative to the working directory
pub fn default_config_path() -> PathBuf {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return first;
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".kube").join("config");
    }

    PathBuf::from(".kube").join("config")
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

pub(crate) fn non_empty_path(value: &Option<PathBuf>) -> Option<&Path> {
    value.as_deref().filter(|p| !p.as_os_str().is_empty())
}
