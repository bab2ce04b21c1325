// ── Runtime bridge configuration ──
//
// These types describe how the bridge talks to the vendor API and how it
// paces its lifecycle. They never touch disk or the environment; the binary
// builds a `BridgeConfig` from its configuration layer and hands it in.

use std::time::Duration;

use hcmqtt_api::{OAuthConfig, TransportConfig};
use url::Url;

/// Everything the bridge needs to run.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the REST API, with a trailing slash.
    pub api_url: Url,
    pub oauth: OAuthConfig,
    pub transport: TransportConfig,
    /// Root of every bus topic (e.g. `home-connect`).
    pub topic_prefix: String,
    /// How often to check for a stored refresh token while unauthorized.
    pub auth_poll_interval: Duration,
    /// Pause between failed bootstrap attempts.
    pub bootstrap_retry_delay: Duration,
    /// Drop the event stream connection after this long without any bytes.
    pub stream_idle_timeout: Duration,
    /// Restart from bootstrap when no frame at all arrives for this long.
    pub keep_alive_timeout: Duration,
    /// Restart from bootstrap when no non-keep-alive frame arrives for this
    /// long. `None` disables the hard restart.
    pub restart_interval: Option<Duration>,
    /// Pause after a watchdog fires before bootstrapping again.
    pub restart_delay: Duration,
    /// Backoff between event stream reconnects.
    pub reconnect: ReconnectConfig,
}

impl BridgeConfig {
    /// Default pacing for the given endpoints.
    pub fn with_defaults(api_url: Url, oauth: OAuthConfig) -> Self {
        Self {
            api_url,
            oauth,
            transport: TransportConfig::default(),
            topic_prefix: "home-connect".into(),
            auth_poll_interval: Duration::from_secs(5),
            bootstrap_retry_delay: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(90),
            restart_interval: None,
            restart_delay: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for event stream reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Delay before reconnect attempt `attempt` (zero-based).
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(16)).unwrap_or(16);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        for attempt in [10, 40, u32::MAX] {
            let delay = calculate_backoff(attempt, &config);
            assert!(
                delay <= Duration::from_millis(12_500),
                "delay at attempt {attempt} ({delay:?}) should be capped near max_delay"
            );
        }
    }
}
