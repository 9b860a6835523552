//! Failure taxonomy for one automation attempt.
//!
//! Everything below the engine returns these (or `anyhow::Error`, which is
//! folded into [`AutomationError::Backend`]). The engine turns the last one
//! into a terminal [`TaskResult`](crate::models::TaskResult); nothing here
//! crosses into the caller's domain.

use std::time::Duration;

use thiserror::Error;

use crate::models::{ErrorCategory, ErrorClassification, SuggestedAction};

/// Stage whose own deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Detecting,
    AwaitingResponse,
    Task,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeoutStage::Detecting => "detecting",
            TimeoutStage::AwaitingResponse => "awaiting response",
            TimeoutStage::Task => "task deadline",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AutomationError {
    /// The target application is not running or has no window.
    #[error("target window not found after {attempts} attempts")]
    NotFound { attempts: u32 },

    /// Prompt delivery failed; the input field was cleared again.
    #[error("prompt injection failed: {reason}")]
    Injection { reason: String },

    #[error("{stage} timed out after {after:?}")]
    TimedOut { stage: TimeoutStage, after: Duration },

    #[error("transient error detected: {}", describe(.0))]
    Transient(ErrorClassification),

    #[error("fatal error detected: {}", describe(.0))]
    Fatal(ErrorClassification),

    #[error("authentication required: {}", describe(.0))]
    AuthenticationRequired(ErrorClassification),

    #[error("remote host {host} unreachable: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    #[error("task cancelled")]
    Cancelled,

    /// OS tooling failure (spawning osascript/xdotool, clipboard I/O).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

fn describe(classification: &ErrorClassification) -> String {
    classification
        .matched_pattern
        .clone()
        .unwrap_or_else(|| classification.category.as_str().to_string())
}

impl AutomationError {
    /// Builds the error the engine should act on for a non-`none` classification.
    pub fn from_classification(classification: ErrorClassification) -> Self {
        match (classification.category, classification.action) {
            (ErrorCategory::Authentication, _) | (_, SuggestedAction::PromptUser) => {
                AutomationError::AuthenticationRequired(classification)
            }
            (ErrorCategory::Fatal, _) | (_, SuggestedAction::Abort) => {
                AutomationError::Fatal(classification)
            }
            _ => AutomationError::Transient(classification),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AutomationError::Injection { .. }
                | AutomationError::TimedOut { .. }
                | AutomationError::Transient(_)
                | AutomationError::Backend(_)
        ) && !matches!(
            self,
            AutomationError::TimedOut {
                stage: TimeoutStage::Task,
                ..
            }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::NotFound { .. } => "NotFound",
            AutomationError::Injection { .. } => "InjectionError",
            AutomationError::TimedOut { .. } => "TimedOut",
            AutomationError::Transient(_) => "TransientError",
            AutomationError::Fatal(_) => "FatalError",
            AutomationError::AuthenticationRequired(_) => "AuthenticationRequired",
            AutomationError::RemoteUnreachable { .. } => "RemoteUnreachable",
            AutomationError::Cancelled => "Cancelled",
            AutomationError::Backend(_) => "BackendError",
        }
    }

    /// Structured classification reported upward with a failed result.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            AutomationError::Transient(c)
            | AutomationError::Fatal(c)
            | AutomationError::AuthenticationRequired(c) => c.clone(),
            AutomationError::NotFound { .. } => {
                ErrorClassification::new(ErrorCategory::Fatal, SuggestedAction::Abort)
                    .with_remediation("start the IDE and open the project window")
            }
            AutomationError::RemoteUnreachable { host, .. } => {
                ErrorClassification::new(ErrorCategory::Fatal, SuggestedAction::Abort)
                    .with_pattern("remote-unreachable")
                    .with_remediation(format!("reconnect SSH session to {host}"))
            }
            AutomationError::Injection { .. } | AutomationError::Backend(_) => {
                ErrorClassification::new(ErrorCategory::Transient, SuggestedAction::Retry)
                    .with_remediation("keep the IDE window unobstructed while a task runs")
            }
            AutomationError::TimedOut { stage, .. } => {
                let hint = match stage {
                    TimeoutStage::Detecting => "the IDE stayed busy; wait for it to settle",
                    _ => "the IDE did not finish responding in time",
                };
                ErrorClassification::new(ErrorCategory::Transient, SuggestedAction::Retry)
                    .with_remediation(hint)
            }
            AutomationError::Cancelled => ErrorClassification::none(),
        }
    }
}

pub type AutomationResult<T> = std::result::Result<T, AutomationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(!AutomationError::NotFound { attempts: 3 }.is_retryable());
        assert!(AutomationError::Injection {
            reason: "paste mismatch".into()
        }
        .is_retryable());
        assert!(AutomationError::TimedOut {
            stage: TimeoutStage::AwaitingResponse,
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!AutomationError::TimedOut {
            stage: TimeoutStage::Task,
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!AutomationError::RemoteUnreachable {
            host: "devbox".into(),
            reason: "exit 255".into()
        }
        .is_retryable());
        assert!(!AutomationError::Cancelled.is_retryable());
    }

    #[test]
    fn classification_maps_to_variant() {
        let auth = ErrorClassification::new(ErrorCategory::Authentication, SuggestedAction::PromptUser);
        assert!(matches!(
            AutomationError::from_classification(auth),
            AutomationError::AuthenticationRequired(_)
        ));

        let fatal = ErrorClassification::new(ErrorCategory::Fatal, SuggestedAction::Abort);
        assert!(matches!(
            AutomationError::from_classification(fatal),
            AutomationError::Fatal(_)
        ));

        let unknown = ErrorClassification::new(ErrorCategory::Unknown, SuggestedAction::Retry);
        assert!(matches!(
            AutomationError::from_classification(unknown),
            AutomationError::Transient(_)
        ));
    }

    #[test]
    fn remote_unreachable_carries_reconnect_hint() {
        let err = AutomationError::RemoteUnreachable {
            host: "devbox".into(),
            reason: "timeout".into(),
        };
        let classification = err.classification();
        assert_eq!(classification.category, ErrorCategory::Fatal);
        assert_eq!(
            classification.remediation.as_deref(),
            Some("reconnect SSH session to devbox")
        );
    }
}
