// OAuth2 authorization-code flow against the Home Connect token endpoint.
//
// The refresh token lives in a `CredentialStore`; the short-lived access
// token lives in the `TokenBroker`. Every successful exchange persists the
// refresh token it returns, since the endpoint may rotate it.

use std::fmt;
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::token::{AccessToken, TokenBroker};
use crate::transport::TransportConfig;

pub const DEFAULT_OAUTH_URL: &str = "https://api.home-connect.com/security/oauth/";
pub const DEFAULT_SCOPE: &str = "IdentifyAppliance Monitor Control Settings";

// ── CredentialStore ──────────────────────────────────────────────────

/// Persistent home of the refresh token.
pub trait CredentialStore: Send + Sync {
    fn load_refresh_token(&self) -> Result<Option<SecretString>, Error>;

    /// Insert or replace the single stored refresh token.
    fn store_refresh_token(&self, token: &SecretString) -> Result<(), Error>;
}

/// Non-persistent store, for tests and one-off runs.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<SecretString>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(SecretString::from(token.into()))),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load_refresh_token(&self) -> Result<Option<SecretString>, Error> {
        Ok(self.token.lock().expect("credential lock poisoned").clone())
    }

    fn store_refresh_token(&self, token: &SecretString) -> Result<(), Error> {
        *self.token.lock().expect("credential lock poisoned") = Some(token.clone());
        Ok(())
    }
}

// ── OAuthConfig ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: Url,
    /// Base of the `authorize` and `token` endpoints, with trailing slash.
    pub oauth_url: Url,
    pub scope: String,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_url", &self.redirect_url.as_str())
            .field("oauth_url", &self.oauth_url.as_str())
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: i64,
    refresh_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    scope: Option<String>,
}

// ── OAuthClient ──────────────────────────────────────────────────────

/// Obtains and caches access tokens. Cheaply cloneable.
#[derive(Clone)]
pub struct OAuthClient {
    inner: Arc<OAuthInner>,
}

struct OAuthInner {
    http: reqwest::Client,
    config: OAuthConfig,
    store: Arc<dyn CredentialStore>,
    broker: TokenBroker,
}

impl OAuthClient {
    pub fn new(
        config: OAuthConfig,
        store: Arc<dyn CredentialStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, config, store))
    }

    pub fn with_client(
        http: reqwest::Client,
        config: OAuthConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(OAuthInner {
                http,
                config,
                store,
                broker: TokenBroker::new(),
            }),
        }
    }

    /// URL the user opens to grant access.
    pub fn authorization_url(&self) -> Result<Url, Error> {
        let config = &self.inner.config;
        let mut url = config.oauth_url.join("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", config.redirect_url.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &config.scope);
        Ok(url)
    }

    /// Redeem an authorization code, persisting the refresh token.
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken, Error> {
        let config = &self.inner.config;
        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &config.client_id),
                ("client_secret", config.client_secret.expose_secret()),
                ("redirect_uri", config.redirect_url.as_str()),
            ])
            .await?;
        info!("authorization code exchanged");
        self.inner.broker.set_access_token(token.clone());
        Ok(token)
    }

    /// Trade the stored refresh token for a new access token.
    pub async fn refresh(&self) -> Result<AccessToken, Error> {
        let refresh_token = self
            .inner
            .store
            .load_refresh_token()?
            .ok_or(Error::NotAuthorized)?;
        let config = &self.inner.config;
        let token = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", &config.client_id),
                ("client_secret", config.client_secret.expose_secret()),
            ])
            .await?;
        debug!(expires_at = %token.expires_at(), "access token refreshed");
        Ok(token)
    }

    /// A valid access token, refreshed at most once across concurrent callers.
    pub async fn access_token(&self) -> Result<AccessToken, Error> {
        let this = self.clone();
        self.inner
            .broker
            .get_access_token(move || async move { this.refresh().await })
            .await
    }

    /// Drop the cached access token (after a 401).
    pub fn invalidate(&self) {
        self.inner.broker.invalidate();
    }

    /// Whether a refresh token has been stored.
    pub fn is_authorized(&self) -> Result<bool, Error> {
        Ok(self.inner.store.load_refresh_token()?.is_some())
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<AccessToken, Error> {
        let url = self.inner.config.oauth_url.join("token")?;
        debug!("POST {}", url);

        let resp = self.inner.http.post(url).form(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        self.inner
            .store
            .store_refresh_token(&SecretString::from(parsed.refresh_token))?;

        Ok(AccessToken::expiring_in(
            SecretString::from(parsed.access_token),
            parsed.expires_in,
        ))
    }
}
