// ABOUTME: Error types for devbox orchestration
// ABOUTME: One variant per failure bucket so every fatal error names the sub-operation that failed

use crate::containers::EngineError;
use crate::readiness::ReadinessOutcome;
use crate::service::ServiceError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for devbox operations
#[derive(Error, Debug)]
pub enum DevboxError {
    /// Environment/config service failures (never retried)
    #[error("Environment resolution failed ({context}): {source}")]
    Resolution {
        context: String,
        #[source]
        source: ServiceError,
    },

    /// Package index failures
    #[error("Package resolution failed for {package}: {source}")]
    PackageIndex {
        package: String,
        #[source]
        source: ServiceError,
    },

    /// Container engine failures on the dev container path
    #[error("Container engine failed to {action}: {source}")]
    Container {
        action: String,
        #[source]
        source: EngineError,
    },

    /// Dev container crashed or never signalled readiness
    #[error("Dev container did not become ready: {outcome}")]
    Readiness {
        outcome: ReadinessOutcome,
        diagnostics: Vec<String>,
    },

    #[error("Port relay sync failed: {0}")]
    Relay(String),

    #[error("VPN tunnel sync failed: {0}")]
    Tunnel(String),

    /// Box hash record or cache file could not be trusted
    #[error("Box hash record error at {path}: {reason}")]
    Drift { path: PathBuf, reason: String },

    #[error("container not running")]
    NotRunning,

    /// User declined a confirmation prompt; nothing was changed
    #[error("Aborted: {0}")]
    Declined(String),

    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DevboxError {
    /// Wrap an engine error with the action that was being attempted
    pub fn container(action: impl Into<String>) -> impl FnOnce(EngineError) -> Self {
        let action = action.into();
        move |source| Self::Container { action, source }
    }

    /// Wrap a service error with the resolution step that issued the call
    pub fn resolution(context: impl Into<String>) -> impl FnOnce(ServiceError) -> Self {
        let context = context.into();
        move |source| Self::Resolution { context, source }
    }

    pub fn drift(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Drift {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label of the failing stage, used by the CLI when printing errors
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Resolution { .. } | Self::PackageIndex { .. } => "resolution",
            Self::Container { .. } | Self::NotRunning | Self::PortAllocation(_) => "container",
            Self::Readiness { .. } => "readiness",
            Self::Relay(_) => "relay",
            Self::Tunnel(_) => "tunnel",
            Self::Drift { .. } => "drift",
            Self::Declined(_) => "aborted",
            Self::InvalidWorkspace(_) | Self::Config(_) | Self::Yaml(_) => "config",
            Self::Io(_) | Self::Json(_) => "io",
        }
    }
}

/// Type alias for Results that return DevboxError
pub type Result<T> = std::result::Result<T, DevboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_stage() {
        let err = DevboxError::container("create dev container")(EngineError::Container(
            "no such image".to_string(),
        ));
        assert_eq!(err.stage(), "container");
        assert!(err.to_string().contains("create dev container"));

        let err = DevboxError::Readiness {
            outcome: ReadinessOutcome::TimedOut,
            diagnostics: vec![],
        };
        assert_eq!(err.stage(), "readiness");
        assert!(err.to_string().contains("timed out"));

        assert_eq!(DevboxError::NotRunning.to_string(), "container not running");
    }
}
