//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use hcmqtt_config::ConfigError;
use hcmqtt_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration")]
    #[diagnostic(
        code(hcmqtt::config),
        help(
            "Check the configuration file at {path}\n\
             or the HCMQTT_* environment variables (nested keys use `__`)."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Authorization ────────────────────────────────────────────────
    #[error("Authorization failed")]
    #[diagnostic(
        code(hcmqtt::auth_failed),
        help(
            "Authorization codes are single-use and expire quickly.\n\
             Run: hcmqtt authorize-url and try again with a fresh code."
        )
    )]
    AuthFailed {
        #[source]
        source: hcmqtt_api::Error,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Could not reach the Home Connect API")]
    #[diagnostic(code(hcmqtt::connection_failed))]
    ConnectionFailed {
        #[source]
        source: hcmqtt_api::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(hcmqtt::bridge))]
    Bridge(CoreError),

    #[error("Failed to install signal handler: {0}")]
    #[diagnostic(code(hcmqtt::signal))]
    Signal(#[source] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::USAGE,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Bridge(_) | Self::Signal(_) => exit_code::GENERAL,
        }
    }

    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }
}

// ── Upstream error mapping ───────────────────────────────────────────

impl From<hcmqtt_api::Error> for CliError {
    fn from(err: hcmqtt_api::Error) -> Self {
        match err {
            hcmqtt_api::Error::Connection(_) | hcmqtt_api::Error::Tls(_) => {
                Self::ConnectionFailed { source: err }
            }
            other => Self::AuthFailed { source: other },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Api(api) => api.into(),
            other => Self::Bridge(other),
        }
    }
}
