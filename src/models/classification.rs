use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    None,
    Transient,
    Fatal,
    Authentication,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::None => "none",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Fatal => "fatal",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestedAction {
    Continue,
    Retry,
    Abort,
    PromptUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    /// `rule-name: /pattern/` of the rule that fired.
    pub matched_pattern: Option<String>,
    pub action: SuggestedAction,
    pub remediation: Option<String>,
}

impl ErrorClassification {
    pub fn none() -> Self {
        Self {
            category: ErrorCategory::None,
            matched_pattern: None,
            action: SuggestedAction::Continue,
            remediation: None,
        }
    }

    pub fn new(category: ErrorCategory, action: SuggestedAction) -> Self {
        Self {
            category,
            matched_pattern: None,
            action,
            remediation: None,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = Some(pattern.into());
        self
    }

    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    pub fn is_none(&self) -> bool {
        self.category == ErrorCategory::None
    }
}
