//! Configuration for the hcmqtt bridge.
//!
//! Built-in defaults, a TOML file and `HCMQTT_`-prefixed environment
//! variables are merged with figment, validated, and translated into the
//! explicit `hcmqtt_core::BridgeConfig` plus the MQTT connection settings
//! the binary needs. The file-backed refresh token store lives in
//! [`credentials`].

pub mod credentials;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use hcmqtt_api::oauth::{DEFAULT_OAUTH_URL, DEFAULT_SCOPE};
use hcmqtt_api::{DEFAULT_API_URL, OAuthConfig, TransportConfig};
use hcmqtt_core::BridgeConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use credentials::FileCredentialStore;

const ENV_PREFIX: &str = "HCMQTT_";
const REDACTED: &str = "<redacted>";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("missing required setting {field}")]
    Missing { field: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub home_connect: HomeConnect,

    #[serde(default)]
    pub mqtt: Mqtt,

    #[serde(default)]
    pub bridge: Bridge,

    /// Where the refresh token is kept.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home_connect: HomeConnect::default(),
            mqtt: Mqtt::default(),
            bridge: Bridge::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// `[home_connect]`: the vendor API application registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HomeConnect {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Plaintext secret; prefer `client_secret_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Environment variable holding the client secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    /// Must match the redirect URL registered for the application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,

    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for HomeConnect {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            client_secret_env: None,
            redirect_url: None,
            api_url: default_api_url(),
            oauth_url: default_oauth_url(),
            scope: default_scope(),
        }
    }
}

/// `[mqtt]`: the broker connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Mqtt {
    /// `mqtt://host[:port]` or `mqtts://host[:port]`.
    #[serde(default = "default_mqtt_url")]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password; prefer `password_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the broker password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_mqtt_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            url: default_mqtt_url(),
            username: None,
            password: None,
            password_env: None,
            client_id: default_mqtt_client_id(),
            topic_prefix: default_topic_prefix(),
            keep_alive_secs: default_mqtt_keep_alive(),
        }
    }
}

/// `[bridge]`: lifecycle pacing, all in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bridge {
    #[serde(default = "default_auth_poll")]
    pub auth_poll_secs: u64,

    #[serde(default = "default_bootstrap_retry")]
    pub bootstrap_retry_secs: u64,

    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    #[serde(default = "default_keep_alive_timeout")]
    pub keep_alive_timeout_secs: u64,

    /// Unset disables the periodic restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_interval_secs: Option<u64>,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for Bridge {
    fn default() -> Self {
        Self {
            auth_poll_secs: default_auth_poll(),
            bootstrap_retry_secs: default_bootstrap_retry(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            keep_alive_timeout_secs: default_keep_alive_timeout(),
            restart_interval_secs: None,
            restart_delay_secs: default_restart_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_oauth_url() -> String {
    DEFAULT_OAUTH_URL.into()
}
fn default_scope() -> String {
    DEFAULT_SCOPE.into()
}
fn default_mqtt_url() -> String {
    "mqtt://localhost:1883".into()
}
fn default_mqtt_client_id() -> String {
    "hcmqtt".into()
}
fn default_topic_prefix() -> String {
    "home-connect".into()
}
fn default_mqtt_keep_alive() -> u64 {
    30
}
fn default_auth_poll() -> u64 {
    5
}
fn default_bootstrap_retry() -> u64 {
    30
}
fn default_stream_idle_timeout() -> u64 {
    60
}
fn default_keep_alive_timeout() -> u64 {
    90
}
fn default_restart_delay() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    30
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "hcmqtt", "hcmqtt")
}

/// Default config file location per platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("hcmqtt.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// The merged provider stack: defaults, then `path` (or the default config
/// path), then environment.
pub fn figment(path: Option<&Path>) -> Figment {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the configuration. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

impl Config {
    /// TOML rendering with every secret replaced.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        redact(&mut shown.home_connect.client_secret);
        redact(&mut shown.mqtt.password);
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Translate into the runtime bridge configuration.
    pub fn bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let hc = &self.home_connect;
        let oauth = OAuthConfig {
            client_id: required("home_connect.client_id", hc.client_id.as_ref())?.clone(),
            client_secret: resolve_secret(
                "home_connect.client_secret",
                hc.client_secret_env.as_deref(),
                hc.client_secret.as_deref(),
            )?
            .ok_or_else(|| ConfigError::Missing {
                field: "home_connect.client_secret".into(),
            })?,
            redirect_url: parse_url(
                "home_connect.redirect_url",
                required("home_connect.redirect_url", hc.redirect_url.as_ref())?,
            )?,
            oauth_url: parse_base_url("home_connect.oauth_url", &hc.oauth_url)?,
            scope: hc.scope.clone(),
        };

        let b = &self.bridge;
        let mut config = BridgeConfig::with_defaults(
            parse_base_url("home_connect.api_url", &hc.api_url)?,
            oauth,
        );
        config.transport = TransportConfig {
            timeout: Duration::from_secs(b.request_timeout_secs),
            ..TransportConfig::default()
        };
        config.topic_prefix = topic_prefix(&self.mqtt.topic_prefix)?;
        config.auth_poll_interval = Duration::from_secs(b.auth_poll_secs);
        config.bootstrap_retry_delay = Duration::from_secs(b.bootstrap_retry_secs);
        config.stream_idle_timeout = Duration::from_secs(b.stream_idle_timeout_secs);
        config.keep_alive_timeout = Duration::from_secs(b.keep_alive_timeout_secs);
        config.restart_interval = b.restart_interval_secs.map(Duration::from_secs);
        config.restart_delay = Duration::from_secs(b.restart_delay_secs);
        Ok(config)
    }

    /// Resolve the broker connection settings.
    pub fn mqtt_settings(&self) -> Result<MqttSettings, ConfigError> {
        let mqtt = &self.mqtt;
        let url = parse_url("mqtt.url", &mqtt.url)?;
        let (tls, default_port) = match url.scheme() {
            "mqtt" | "tcp" => (false, 1883),
            "mqtts" | "ssl" => (true, 8883),
            other => {
                return Err(ConfigError::Validation {
                    field: "mqtt.url".into(),
                    reason: format!("unsupported scheme '{other}', expected mqtt or mqtts"),
                });
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::Validation {
                field: "mqtt.url".into(),
                reason: "missing host".into(),
            })?
            .to_owned();

        let password =
            resolve_secret("mqtt.password", mqtt.password_env.as_deref(), mqtt.password.as_deref())?;
        let credentials = match (&mqtt.username, password) {
            (Some(username), Some(password)) => Some((username.clone(), password)),
            (Some(username), None) => Some((username.clone(), SecretString::from(String::new()))),
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    field: "mqtt.username".into(),
                });
            }
            (None, None) => None,
        };

        Ok(MqttSettings {
            host,
            port: url.port().unwrap_or(default_port),
            tls,
            client_id: mqtt.client_id.clone(),
            credentials,
            keep_alive: Duration::from_secs(mqtt.keep_alive_secs),
        })
    }

    /// Open the refresh token store under `data_dir`, creating it if needed.
    pub fn credential_store(&self) -> Result<FileCredentialStore, ConfigError> {
        FileCredentialStore::open(&self.data_dir)
    }
}

/// Broker connection settings, validated.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub client_id: String,
    pub credentials: Option<(String, SecretString)>,
    pub keep_alive: Duration,
}

// ── Helpers ─────────────────────────────────────────────────────────

fn redact(secret: &mut Option<String>) {
    if secret.is_some() {
        *secret = Some(REDACTED.into());
    }
}

fn required<'a, T>(field: &str, value: Option<&'a T>) -> Result<&'a T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing {
        field: field.into(),
    })
}

/// Env var named in config wins over the plaintext value. A named env var
/// that is unset is an error rather than a silent fallback.
fn resolve_secret(
    field: &str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
) -> Result<Option<SecretString>, ConfigError> {
    if let Some(env_name) = env_name {
        return std::env::var(env_name)
            .map(|value| Some(SecretString::from(value)))
            .map_err(|_| ConfigError::Validation {
                field: format!("{field}_env"),
                reason: format!("environment variable {env_name} is not set"),
            });
    }
    Ok(plaintext.map(|value| SecretString::from(value.to_owned())))
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Parse a URL that relative paths are joined onto; forces a trailing slash.
fn parse_base_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    if raw.ends_with('/') {
        parse_url(field, raw)
    } else {
        parse_url(field, &format!("{raw}/"))
    }
}

fn topic_prefix(raw: &str) -> Result<String, ConfigError> {
    let prefix = raw.trim_matches('/');
    if prefix.is_empty() || prefix.contains(['+', '#']) {
        return Err(ConfigError::Validation {
            field: "mqtt.topic_prefix".into(),
            reason: format!("'{raw}' is not a usable topic prefix"),
        });
    }
    Ok(prefix.to_owned())
}
