//! Everything related to building in-cluster configuration.
//!
//! Pods get a service account token and the cluster CA mounted at well known
//! locations, and the API server address through environment variables.

use std::path::PathBuf;

use super::{Cluster, ResolvedContext, User};

const TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const ROOT_CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Name given to the context, cluster and user built from the pod environment.
pub const IN_CLUSTER_CONTEXT: &str = "in-cluster";

/// An error returned when building an in-cluster configuration.
#[derive(Debug, thiserror::Error)]
pub enum InClusterError {
    /// Not running inside a cluster, or the service env vars are not set.
    #[error("unable to load in-cluster configuration, KUBERNETES_SERVICE_HOST and KUBERNETES_SERVICE_PORT must be defined (missing {missing})")]
    NotInCluster { missing: &'static str },

    /// The token file could not be read successfully.
    #[error("unable to read the service account token {}", path.display())]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Locations of the service account material.
#[derive(Debug, Clone)]
pub struct InClusterConfig {
    pub token_file: PathBuf,
    pub root_ca_file: PathBuf,
    pub namespace_file: PathBuf,
}

impl Default for InClusterConfig {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from(TOKEN_FILE),
            root_ca_file: PathBuf::from(ROOT_CA_FILE),
            namespace_file: PathBuf::from(NAMESPACE_FILE),
        }
    }
}

impl InClusterConfig {
    /// Prepares a context suitable for use when running in a k8s pod.
    pub fn load(&self) -> Result<ResolvedContext, InClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok();
        let port = std::env::var("KUBERNETES_SERVICE_PORT").ok();
        self.resolve(host.as_deref(), port.as_deref())
    }

    fn resolve(
        &self,
        host: Option<&str>,
        port: Option<&str>,
    ) -> Result<ResolvedContext, InClusterError> {
        let host = host
            .filter(|h| !h.is_empty())
            .ok_or(InClusterError::NotInCluster {
                missing: "KUBERNETES_SERVICE_HOST",
            })?;
        let port = port
            .filter(|p| !p.is_empty())
            .ok_or(InClusterError::NotInCluster {
                missing: "KUBERNETES_SERVICE_PORT",
            })?;

        let token =
            std::fs::read_to_string(&self.token_file).map_err(|source| InClusterError::Token {
                path: self.token_file.clone(),
                source,
            })?;

        let cluster = Cluster {
            server: format!("https://{}", join_host_port(host, port)),
            certificate_authority: Some(self.root_ca_file.clone()),
            certificate_authority_data: None,
        };
        let user = User {
            token: Some(token.trim().to_string()),
            ..Default::default()
        };

        let context = ResolvedContext::new(IN_CLUSTER_CONTEXT, cluster, user);

        // The namespace file is optional; pods without it fall back to the
        // query's own namespace.
        match std::fs::read_to_string(&self.namespace_file) {
            Ok(ns) if !ns.trim().is_empty() => Ok(context.with_namespace(ns.trim())),
            _ => Ok(context),
        }
    }
}

/// Same logic as Go's `net.JoinHostPort`: IPv6 hosts are bracketed.
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        return format!("[{host}]:{port}");
    }
    format!("{host}:{port}")
}
