//! Certificate material for the cluster connection.
//!
//! Server trust comes from a cluster's CA (inline base64 data first, then a
//! file). The client certificate comes from a user's inline data first, then
//! from certificate/key files. Either may be absent without error: no CA
//! means the platform's default roots are used, no client certificate means
//! the user authenticates some other way.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Certificate, ClientBuilder, Identity};
use x509_parser::pem::Pem;

use crate::config::{non_empty, non_empty_path, Cluster, ResolvedContext, User};

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("couldn't parse CA data for cluster: {reason}")]
    InvalidCaData { reason: String },

    #[error("failed to read CA file {}", path.display())]
    ReadCaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CA file {} contains no valid certificates", path.display())]
    InvalidCaFile { path: PathBuf },

    #[error("{field} is not valid base64")]
    InvalidClientData {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to read client credential file {}", path.display())]
    ReadClientFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("client certificate and key do not form a valid identity")]
    InvalidIdentity(#[source] reqwest::Error),
}

/// A non-empty set of trusted root certificates.
#[derive(Debug, Clone)]
pub struct TrustPool {
    certs: Vec<Certificate>,
}

impl TrustPool {
    /// Collect every certificate in a PEM bundle that parses as X.509.
    ///
    /// Blocks that are not certificates or fail to parse are skipped.
    /// Returns `None` when nothing usable is left.
    fn from_pem(pem: &[u8]) -> Option<Self> {
        let mut certs = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed PEM block");
                    continue;
                }
            };
            if block.label != "CERTIFICATE" {
                continue;
            }
            if let Err(e) = block.parse_x509() {
                tracing::warn!(error = %e, "Skipping CA certificate that does not parse");
                continue;
            }
            match Certificate::from_der(&block.contents) {
                Ok(cert) => certs.push(cert),
                Err(e) => tracing::warn!(error = %e, "Skipping unusable CA certificate"),
            }
        }

        if certs.is_empty() {
            return None;
        }
        Some(Self { certs })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }
}

/// Load the CA roots a cluster declares.
///
/// Returns `Ok(None)` when the cluster configures no CA at all. A CA that is
/// configured but unusable is always an error; there is no fall through from
/// bad inline data to the file.
pub fn load_server_trust(cluster: &Cluster) -> Result<Option<TrustPool>, CertificateError> {
    if let Some(data) = non_empty(&cluster.certificate_authority_data) {
        let pem = decode_base64(data).map_err(|e| CertificateError::InvalidCaData {
            reason: e.to_string(),
        })?;
        let pool = TrustPool::from_pem(&pem).ok_or_else(|| CertificateError::InvalidCaData {
            reason: "no PEM certificates found".to_string(),
        })?;
        tracing::debug!(certificates = pool.len(), "Loaded inline cluster CA");
        return Ok(Some(pool));
    }

    if let Some(path) = non_empty_path(&cluster.certificate_authority) {
        let pem = std::fs::read(path).map_err(|source| CertificateError::ReadCaFile {
            path: path.to_path_buf(),
            source,
        })?;
        let pool = TrustPool::from_pem(&pem).ok_or_else(|| CertificateError::InvalidCaFile {
            path: path.to_path_buf(),
        })?;
        tracing::debug!(certificates = pool.len(), path = %path.display(), "Loaded cluster CA file");
        return Ok(Some(pool));
    }

    Ok(None)
}

/// Load the client certificate a user declares.
///
/// Returns `Ok(None)` when neither a complete inline pair nor a complete file
/// pair is configured. Decode and parse failures are errors.
pub fn load_client_certificate(user: &User) -> Result<Option<Identity>, CertificateError> {
    if user.has_cert_data() {
        let cert = decode_client_field(&user.client_certificate_data, "client-certificate-data")?;
        let key = decode_client_field(&user.client_key_data, "client-key-data")?;
        return identity_from_parts(&cert, &key).map(Some);
    }

    if user.has_cert_files() {
        let (Some(cert_path), Some(key_path)) = (
            non_empty_path(&user.client_certificate),
            non_empty_path(&user.client_key),
        ) else {
            return Ok(None);
        };
        let cert = read_client_file(cert_path)?;
        let key = read_client_file(key_path)?;
        return identity_from_parts(&cert, &key).map(Some);
    }

    Ok(None)
}

/// TLS material assembled for one resolved context.
#[derive(Default)]
pub struct TlsMaterial {
    pub trust: Option<TrustPool>,
    pub identity: Option<Identity>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("trust", &self.trust.as_ref().map(TrustPool::len))
            .field("identity", &self.identity.is_some())
            .finish()
    }
}

impl TlsMaterial {
    pub fn load(context: &ResolvedContext) -> Result<Self, CertificateError> {
        Ok(Self {
            trust: load_server_trust(context.cluster())?,
            identity: load_client_certificate(context.user())?,
        })
    }

    /// Install the material on a reqwest client builder.
    ///
    /// A configured CA replaces the built-in roots rather than extending them.
    pub fn apply(self, mut builder: ClientBuilder) -> ClientBuilder {
        builder = builder.use_rustls_tls();

        if let Some(trust) = self.trust {
            builder = builder.tls_built_in_root_certs(false);
            for cert in trust.certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(identity) = self.identity {
            builder = builder.identity(identity);
        }

        builder
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

fn decode_client_field(
    value: &Option<String>,
    field: &'static str,
) -> Result<Vec<u8>, CertificateError> {
    decode_base64(value.as_deref().unwrap_or_default())
        .map_err(|source| CertificateError::InvalidClientData { field, source })
}

fn read_client_file(path: &Path) -> Result<Vec<u8>, CertificateError> {
    std::fs::read(path).map_err(|source| CertificateError::ReadClientFile {
        path: path.to_path_buf(),
        source,
    })
}

// rustls identities are read from a single PEM buffer holding both parts.
fn identity_from_parts(cert: &[u8], key: &[u8]) -> Result<Identity, CertificateError> {
    let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
    pem.extend_from_slice(cert);
    pem.push(b'\n');
    pem.extend_from_slice(key);
    Identity::from_pem(&pem).map_err(CertificateError::InvalidIdentity)
}
