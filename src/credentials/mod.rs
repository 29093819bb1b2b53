//! Bearer credentials issued by an external command.
//!
//! A user with an `exec` section gets its token from a command that prints an
//! `ExecCredential` document:
//!
//! ```json
//! {
//!   "kind": "ExecCredential",
//!   "apiVersion": "client.authentication.k8s.io/v1",
//!   "status": {
//!     "token": "opaque",
//!     "expirationTimestamp": "2099-01-01T00:00:00Z"
//!   }
//! }
//! ```
//!
//! [`ExecPluginRunner`] runs the command, and [`CredentialCache`] makes sure
//! that concurrent requests share a single run per refresh.

mod cache;
mod exec;

pub use cache::{CacheState, CredentialCache, CredentialCacheBuilder, DEFAULT_SAFETY_MARGIN};
pub use exec::ExecPluginRunner;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

/// A bearer token and the moment it stops being valid.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// `None` means the issuer did not bound the token's lifetime.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credential is still usable at `now`, treating it as expired
    /// `safety_margin` before its actual expiration.
    pub fn is_fresh(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at
                .checked_sub_signed(safety_margin)
                .is_some_and(|stale_at| now < stale_at),
            None => true,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Failure to obtain a credential from the external command.
///
/// Cloneable so one failed refresh can be reported to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecPluginError {
    #[error("failed to run credential command {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("credential command {command:?} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("credential command {command:?} printed invalid output (stderr: {stderr})")]
    InvalidOutput {
        command: String,
        stderr: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("credential command {command:?} returned kind {kind:?}, expected ExecCredential")]
    UnexpectedKind { command: String, kind: String },

    #[error("credential command {command:?} returned no status.token (stderr: {stderr})")]
    MissingToken { command: String, stderr: String },
}

/// Errors surfaced to a caller asking the cache for a credential.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Exec(#[from] ExecPluginError),

    /// The refresh task ended without reporting an outcome.
    #[error("credential refresh ended without a result")]
    RefreshAbandoned,

    #[error("timed out after {0:?} waiting for a credential")]
    Timeout(std::time::Duration),
}

/// Something that can issue a fresh credential.
///
/// Issuing may be slow and may have side effects (e.g. interactive login), so
/// callers go through [`CredentialCache`] rather than calling this directly.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Credential, ExecPluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_freshness_honours_safety_margin() {
        let now = Utc::now();
        let credential = Credential::new("abc", Some(now + Duration::minutes(5)));
        assert!(credential.is_fresh(now, Duration::minutes(1)));
        assert!(credential.is_fresh(now + Duration::minutes(3), Duration::minutes(1)));
        assert!(!credential.is_fresh(now + Duration::minutes(4), Duration::minutes(1)));
        assert!(!credential.is_fresh(now + Duration::minutes(10), Duration::minutes(1)));
    }

    #[test]
    fn test_margin_beyond_representable_time_is_stale() {
        let now = Utc::now();
        let credential = Credential::new("abc", Some(now + Duration::hours(1)));
        assert!(!credential.is_fresh(now, Duration::MAX));
    }

    #[test]
    fn test_unbounded_credential_is_always_fresh() {
        let credential = Credential::new("abc", None);
        assert!(credential.is_fresh(Utc::now() + Duration::days(3650), Duration::minutes(1)));
        assert_eq!(credential.token().expose_secret(), "abc");
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("very-secret", None);
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
