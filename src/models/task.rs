use serde::{Deserialize, Serialize};

use super::{ErrorClassification, ExtractionResult};

/// Inbound request from the queueing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub prompt: String,
    /// `ssh://host/path`, `vscode-remote://ssh-remote+host/path` or a local path.
    #[serde(default)]
    pub context_hint: Option<String>,
    /// Overall budget for the task; settings provide the default.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl TaskDescriptor {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context_hint: None,
            deadline_ms: None,
        }
    }

    pub fn with_context(mut self, hint: impl Into<String>) -> Self {
        self.context_hint = Some(hint.into());
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalState {
    Completed,
    Failed,
    Cancelled,
}

/// Outbound record; exactly one is produced per accepted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub state: TerminalState,
    pub output: Option<ExtractionResult>,
    pub classification: Option<ErrorClassification>,
    /// Human-readable failure category, e.g. "NotFound".
    pub error_kind: Option<String>,
    pub message: Option<String>,
    pub remediation: Option<String>,
    pub attempts: u32,
    /// Backoff applied before each retry, in order.
    #[serde(default)]
    pub retry_delays_ms: Vec<u64>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.state == TerminalState::Completed
    }
}
