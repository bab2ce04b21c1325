// Home Connect REST client
//
// Every call fetches a bearer token from the OAuth client, waits for
// admission from the request limiter, then classifies the outcome. A 429
// with Retry-After pauses the limiter; a 401 drops the cached token.
// Resource helpers turn 404/409 into `None` where the API uses them to mean
// "appliance offline" or "no program".

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::events::EventStream;
use crate::limiter::{LimiterConfig, RequestLimiter};
use crate::models::{
    Appliance, ApplianceList, Program, ProgramResponse, SettingsList, StatusList, parse_key_values,
};
use crate::oauth::OAuthClient;
use crate::transport::TransportConfig;

pub const DEFAULT_API_URL: &str = "https://api.home-connect.com/api/";
pub const JSON_MEDIA_TYPE: &str = "application/vnd.bsh.sdk.v1+json";
const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

/// Writable appliance resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Setting(&'a str),
    ActiveProgram,
    SelectedProgram,
}

impl Resource<'_> {
    fn path(&self, appliance_id: &str) -> String {
        match self {
            Self::Setting(key) => format!("homeappliances/{appliance_id}/settings/{key}"),
            Self::ActiveProgram => format!("homeappliances/{appliance_id}/programs/active"),
            Self::SelectedProgram => format!("homeappliances/{appliance_id}/programs/selected"),
        }
    }
}

#[derive(Serialize)]
struct DataEnvelope<'a, T: Serialize> {
    data: &'a T,
}

/// Authenticated, rate-limited Home Connect API client. Cheaply cloneable.
#[derive(Clone)]
pub struct HomeConnectClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    oauth: OAuthClient,
    limiter: RequestLimiter,
}

impl HomeConnectClient {
    /// Build a client from transport settings.
    ///
    /// `base_url` is the API root, e.g. `https://api.home-connect.com/api/`.
    pub fn new(
        base_url: Url,
        oauth: OAuthClient,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_clients(
            transport.build_client()?,
            transport.build_stream_client()?,
            base_url,
            oauth,
            LimiterConfig::default(),
        ))
    }

    /// Build a client around pre-built HTTP clients.
    pub fn with_clients(
        http: reqwest::Client,
        stream_http: reqwest::Client,
        base_url: Url,
        oauth: OAuthClient,
        limiter: LimiterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                stream_http,
                base_url,
                oauth,
                limiter: RequestLimiter::new(limiter),
            }),
        }
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.inner.oauth
    }

    pub fn limiter(&self) -> &RequestLimiter {
        &self.inner.limiter
    }

    // ── Appliances ───────────────────────────────────────────────────

    pub async fn list_appliances(&self) -> Result<Vec<Appliance>, Error> {
        let list: ApplianceList = self.get_at("homeappliances", &["data"]).await?;
        Ok(list.appliances)
    }

    pub async fn get_appliance(&self, appliance_id: &str) -> Result<Appliance, Error> {
        self.get_at(&format!("homeappliances/{appliance_id}"), &["data"])
            .await
    }

    pub async fn get_status(
        &self,
        appliance_id: &str,
    ) -> Result<Option<BTreeMap<String, Value>>, Error> {
        let path = format!("homeappliances/{appliance_id}/status");
        let list: Option<StatusList> = absent_if_unavailable(self.get_at(&path, &["data"]).await)?;
        Ok(list.map(|l| parse_key_values(l.status)))
    }

    pub async fn get_settings(
        &self,
        appliance_id: &str,
    ) -> Result<Option<BTreeMap<String, Value>>, Error> {
        let path = format!("homeappliances/{appliance_id}/settings");
        let list: Option<SettingsList> =
            absent_if_unavailable(self.get_at(&path, &["data"]).await)?;
        Ok(list.map(|l| parse_key_values(l.settings)))
    }

    pub async fn get_active_program(&self, appliance_id: &str) -> Result<Option<Program>, Error> {
        self.get_program(&format!("homeappliances/{appliance_id}/programs/active"))
            .await
    }

    pub async fn get_selected_program(
        &self,
        appliance_id: &str,
    ) -> Result<Option<Program>, Error> {
        self.get_program(&format!("homeappliances/{appliance_id}/programs/selected"))
            .await
    }

    async fn get_program(&self, path: &str) -> Result<Option<Program>, Error> {
        let raw: Option<ProgramResponse> = absent_if_unavailable(self.get_at(path, &["data"]).await)?;
        Ok(raw.map(Program::from))
    }

    /// `PUT` a resource, wrapping `data` in the `{"data": ...}` envelope.
    pub async fn update_appliance<T: Serialize>(
        &self,
        appliance_id: &str,
        resource: Resource<'_>,
        data: &T,
    ) -> Result<(), Error> {
        let body = serde_json::to_vec(&DataEnvelope { data })?;
        let url = self.url(&resource.path(appliance_id))?;
        debug!("PUT {}", url);

        let request = self
            .inner
            .http
            .put(url)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
            .body(body);
        self.send(request).await?;
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Open the event stream for all appliances.
    ///
    /// Only opening the connection goes through the limiter; the stream
    /// itself does not hold a slot.
    pub async fn events(&self, idle_timeout: Duration) -> Result<EventStream, Error> {
        let url = self.url("homeappliances/events")?;
        debug!("GET {} (event stream)", url);

        let token = self.inner.oauth.access_token().await?;
        let request = self
            .inner
            .stream_http
            .get(url)
            .header(ACCEPT, EVENT_STREAM_MEDIA_TYPE)
            .header(AUTHORIZATION, token.bearer());

        let resp = self.inner.limiter.perform(request.send()).await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify(status, &headers, body));
        }

        Ok(EventStream::spawn(resp, idle_timeout))
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.inner.base_url.join(path)?)
    }

    /// `GET` a path and decode the JSON found under `at`.
    pub async fn get_at<T: DeserializeOwned>(&self, path: &str, at: &[&str]) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let request = self.inner.http.get(url).header(ACCEPT, JSON_MEDIA_TYPE);
        let body = self.send(request).await?;

        let root: Value = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;
        let node = at
            .iter()
            .try_fold(&root, |node, key| node.get(key))
            .ok_or_else(|| Error::Deserialization {
                message: format!("missing `{}` in response", at.join(".")),
                body: body.clone(),
            })?;

        T::deserialize(node).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Authorize, run through the limiter, and return the body of a 2xx.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, Error> {
        let token = self.inner.oauth.access_token().await?;
        let request = request.header(AUTHORIZATION, token.bearer());

        let (status, headers, body) = self
            .inner
            .limiter
            .perform(async {
                let resp = request.send().await?;
                let status = resp.status();
                let headers = resp.headers().clone();
                let body = resp.text().await?;
                Ok::<_, Error>((status, headers, body))
            })
            .await?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(self.classify(status, &headers, body))
        }
    }

    fn classify(&self, status: StatusCode, headers: &HeaderMap, body: String) -> Error {
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                if let Some(retry_after) = retry_after(headers) {
                    warn!(retry_after_secs = retry_after.as_secs(), "rate limited by API");
                    self.inner.limiter.disable_requests(retry_after);
                }
            }
            StatusCode::UNAUTHORIZED => {
                warn!("access token rejected");
                self.inner.oauth.invalidate();
            }
            _ => {}
        }
        Error::Api {
            status: status.as_u16(),
            body,
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn absent_if_unavailable<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found_or_conflict() => Ok(None),
        Err(e) => Err(e),
    }
}
