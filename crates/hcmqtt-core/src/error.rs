// ── Core error types ──
//
// Errors raised by the store, the command mapping and the bridge. Transport
// failures from `hcmqtt-api` are carried as-is in `Api`; everything else is
// a bridge-level condition.

use std::sync::Arc;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── API errors ───────────────────────────────────────────────────
    #[error(transparent)]
    Api(#[from] hcmqtt_api::Error),

    /// One or more parallel field fetches failed. Fields that did load were
    /// still applied.
    #[error("Failed to update appliance data ({} error(s)): {}", .causes.len(), join_causes(.causes))]
    DataUpdate { causes: Vec<Arc<CoreError>> },

    /// Result of an in-flight operation shared between callers.
    #[error(transparent)]
    Shared(Arc<CoreError>),

    // ── Command errors ───────────────────────────────────────────────
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error("Unknown appliance: {id}")]
    UnknownAppliance { id: String },

    #[error("Invalid payload for command `{command}`: {reason}")]
    InvalidPayload { command: String, reason: String },

    #[error("Command `{command}` is not supported by appliance type {appliance_type}")]
    UnsupportedByAppliance {
        command: String,
        appliance_type: String,
    },

    #[error("Command payload is not a JSON object: {reason}")]
    InvalidCommandJson { reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn join_causes(causes: &[Arc<CoreError>]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Returns `true` if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Shared(inner) => inner.is_cancelled(),
            Self::DataUpdate { causes } => causes.iter().all(|c| c.is_cancelled()),
            _ => false,
        }
    }

    /// Returns `true` if the user has not authorized the bridge yet.
    pub fn is_not_authorized(&self) -> bool {
        match self {
            Self::Api(e) => e.is_not_authorized(),
            Self::Shared(inner) => inner.is_not_authorized(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_update_lists_causes() {
        let err = CoreError::DataUpdate {
            causes: vec![
                Arc::new(CoreError::Cancelled),
                Arc::new(CoreError::UnknownAppliance { id: "A1".into() }),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 error(s)"));
        assert!(rendered.contains("Unknown appliance: A1"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn shared_errors_are_transparent() {
        let err = CoreError::Shared(Arc::new(CoreError::Cancelled));
        assert_eq!(err.to_string(), "Operation cancelled");
        assert!(err.is_cancelled());
    }
}
