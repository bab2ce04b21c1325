//! Access-token cache with coalesced refresh.
//!
//! [`TokenBroker`] hands out the cached [`AccessToken`] until it is within
//! [`REFRESH_MARGIN_SECS`] of expiry, then runs the caller-supplied refresh once
//! no matter how many tasks ask at the same time. Late arrivals await the
//! in-flight refresh through a [`Shared`] future.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::Error;

/// Tokens are refreshed this many seconds before they actually expire.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

// ── AccessToken ──────────────────────────────────────────────────────

/// A bearer token and its absolute expiry. Replaced wholesale on refresh.
#[derive(Clone)]
pub struct AccessToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    pub fn new(token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Build a token that expires `expires_in_secs` from now.
    pub fn expiring_in(token: SecretString, expires_in_secs: i64) -> Self {
        Self::new(token, Utc::now() + TimeDelta::seconds(expires_in_secs))
    }

    pub fn secret(&self) -> &SecretString {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `Authorization` header value.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    pub fn needs_refresh(&self) -> bool {
        Utc::now() >= self.expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

// ── TokenBroker ──────────────────────────────────────────────────────

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, Arc<Error>>>>;

#[derive(Debug, Default)]
pub struct TokenBroker {
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    token: Option<AccessToken>,
    inflight: Option<(u64, RefreshFuture)>,
    generation: u64,
}

impl std::fmt::Debug for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerState")
            .field("token", &self.token)
            .field("refreshing", &self.inflight.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a usable token, refreshing through `refresh` if needed.
    ///
    /// Concurrent callers share a single refresh. If it fails, all of them
    /// get [`Error::TokenRefresh`] with the same cause and the next call
    /// starts over.
    pub async fn get_access_token<F, Fut>(&self, refresh: F) -> Result<AccessToken, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, Error>> + Send + 'static,
    {
        let (id, pending) = {
            let mut state = self.state.lock().expect("token lock poisoned");
            if let Some(token) = state.token.as_ref().filter(|t| !t.needs_refresh()) {
                return Ok(token.clone());
            }
            if let Some((id, pending)) = &state.inflight {
                (*id, pending.clone())
            } else {
                debug!("refreshing access token");
                state.generation += 1;
                let id = state.generation;
                let pending = refresh().map(|r| r.map_err(Arc::new)).boxed().shared();
                state.inflight = Some((id, pending.clone()));
                (id, pending)
            }
        };

        let result = pending.await;

        {
            let mut state = self.state.lock().expect("token lock poisoned");
            if state.inflight.as_ref().is_some_and(|(current, _)| *current == id) {
                state.inflight = None;
                state.token = result.as_ref().ok().cloned();
            }
        }

        result.map_err(Error::TokenRefresh)
    }

    /// Drop the cached token so the next caller refreshes.
    pub fn invalidate(&self) {
        debug!("access token invalidated");
        self.state.lock().expect("token lock poisoned").token = None;
    }

    /// Install a token obtained out-of-band (authorization-code exchange).
    pub fn set_access_token(&self, token: AccessToken) {
        self.state.lock().expect("token lock poisoned").token = Some(token);
    }

    pub fn has_token(&self) -> bool {
        self.state.lock().expect("token lock poisoned").token.is_some()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
