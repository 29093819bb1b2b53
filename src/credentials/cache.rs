//! Shares one live credential between concurrent requests.
//!
//! The cache is always in one of three states:
//!
//! - **Idle**: no usable credential. The next caller starts a refresh.
//! - **Refreshing**: exactly one refresh is in flight. Callers wait for its
//!   outcome instead of starting their own.
//! - **Ready**: a credential that is fresh until `expires_at - safety_margin`.
//!   Once stale, the next caller moves the cache back through Idle into
//!   Refreshing.
//!
//! A failed refresh returns the cache to Idle and hands the same error to
//! every waiter, so the following request simply tries again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use super::{Credential, CredentialError, CredentialSource, ExecPluginError};
use crate::clock::{Clock, SystemClock};

/// How long before expiration a credential is treated as stale.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

type Outcome = Result<Credential, ExecPluginError>;

enum State {
    Idle,
    Refreshing {
        generation: u64,
        outcome: watch::Receiver<Option<Outcome>>,
    },
    Ready(Credential),
}

/// Observable summary of the cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    Refreshing,
    Ready,
}

struct Shared {
    state: State,
    generation: u64,
}

struct Inner {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    safety_margin: chrono::Duration,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Leave Refreshing for `generation`, unless a newer refresh replaced it.
    fn finish(&self, generation: u64, outcome: &Outcome) {
        let mut shared = self.lock();
        if !matches!(shared.state, State::Refreshing { generation: g, .. } if g == generation) {
            return;
        }

        shared.state = match outcome {
            Ok(credential) => {
                tracing::info!(expires_at = ?credential.expires_at(), "Refreshed exec credential");
                State::Ready(credential.clone())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Exec credential refresh failed");
                State::Idle
            }
        };
    }

    /// Drop a Refreshing state whose task ended without reporting.
    fn abandon(&self, generation: u64) {
        let mut shared = self.lock();
        if matches!(shared.state, State::Refreshing { generation: g, .. } if g == generation) {
            tracing::warn!(generation, "Exec credential refresh abandoned");
            shared.state = State::Idle;
        }
    }
}

// Resets the cache to Idle if the refresh task unwinds before finishing.
struct RefreshGuard {
    inner: Arc<Inner>,
    generation: u64,
    finished: bool,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.abandon(self.generation);
        }
    }
}

pub struct CredentialCacheBuilder {
    source: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
}

impl CredentialCacheBuilder {
    pub fn safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> CredentialCache {
        CredentialCache {
            inner: Arc::new(Inner {
                source: self.source,
                clock: self.clock,
                safety_margin: chrono::Duration::from_std(self.safety_margin)
                    .unwrap_or(chrono::Duration::MAX),
                shared: Mutex::new(Shared {
                    state: State::Idle,
                    generation: 0,
                }),
            }),
        }
    }
}

/// A concurrency-safe holder for one context's exec-issued credential.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl CredentialCache {
    pub fn new(source: impl CredentialSource + 'static) -> Self {
        Self::builder(Arc::new(source)).build()
    }

    pub fn builder(source: Arc<dyn CredentialSource>) -> CredentialCacheBuilder {
        CredentialCacheBuilder {
            source,
            clock: Arc::new(SystemClock),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn state(&self) -> CacheState {
        match self.inner.lock().state {
            State::Idle => CacheState::Idle,
            State::Refreshing { .. } => CacheState::Refreshing,
            State::Ready(_) => CacheState::Ready,
        }
    }

    /// Return a fresh credential, refreshing it first if necessary.
    ///
    /// Only callers that find a fresh credential return without waiting.
    pub async fn get(&self) -> Result<Credential, CredentialError> {
        let (generation, outcome) = {
            let mut shared = self.inner.lock();
            let now = self.inner.clock.now();

            let in_flight = match &shared.state {
                State::Ready(credential) if credential.is_fresh(now, self.inner.safety_margin) => {
                    return Ok(credential.clone());
                }
                State::Ready(_) => {
                    tracing::debug!("Exec credential is stale");
                    None
                }
                State::Idle => None,
                State::Refreshing {
                    generation,
                    outcome,
                } => Some((*generation, outcome.clone())),
            };

            match in_flight {
                Some(in_flight) => in_flight,
                None => self.start_refresh(&mut shared),
            }
        };

        self.wait(generation, outcome).await
    }

    /// Like [`get`](Self::get), but gives up waiting after `timeout`.
    ///
    /// Timing out only affects this caller; the refresh keeps running and its
    /// result still lands in the cache.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<Credential, CredentialError> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| CredentialError::Timeout(timeout))?
    }

    fn start_refresh(&self, shared: &mut Shared) -> (u64, watch::Receiver<Option<Outcome>>) {
        shared.generation += 1;
        let generation = shared.generation;
        let (tx, rx) = watch::channel(None);
        shared.state = State::Refreshing {
            generation,
            outcome: rx.clone(),
        };

        tracing::debug!(generation, "Refreshing exec credential");

        // The refresh runs detached so a caller that stops waiting cannot
        // cancel it for everyone else.
        let mut guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            generation,
            finished: false,
        };
        tokio::spawn(async move {
            let outcome = guard.inner.source.fetch().await;
            guard.inner.finish(generation, &outcome);
            guard.finished = true;
            let _ = tx.send(Some(outcome));
        });

        (generation, rx)
    }

    async fn wait(
        &self,
        generation: u64,
        mut outcome: watch::Receiver<Option<Outcome>>,
    ) -> Result<Credential, CredentialError> {
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match result {
            Some(outcome) => outcome.map_err(CredentialError::from),
            None => {
                // The refresh task died without reporting; unblock the state
                // so the next caller can try again.
                let mut shared = self.inner.lock();
                if matches!(shared.state, State::Refreshing { generation: g, .. } if g == generation)
                {
                    shared.state = State::Idle;
                }
                Err(CredentialError::RefreshAbandoned)
            }
        }
    }
}
