use anyhow::{Context, Result};
use regex::Regex;

use crate::models::{
    ErrorCategory, ErrorClassification, ExtractionResult, SuggestedAction, WindowState,
};
use crate::settings::AgentSettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "error_detector";

use crate::log_info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTarget {
    Title,
    Output,
    Any,
}

#[derive(Debug, Clone)]
pub struct ErrorRule {
    pub name: String,
    pub target: MatchTarget,
    pub pattern: Regex,
    pub category: ErrorCategory,
    pub action: SuggestedAction,
    pub remediation: Option<String>,
}

impl ErrorRule {
    pub fn new(
        name: &str,
        target: MatchTarget,
        pattern: &str,
        category: ErrorCategory,
        action: SuggestedAction,
        remediation: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            target,
            pattern: Regex::new(pattern)
                .with_context(|| format!("invalid pattern for rule '{name}'"))?,
            category,
            action,
            remediation: remediation.map(String::from),
        })
    }

    fn matches(&self, title: &str, output: Option<&str>) -> bool {
        let title_hit = || self.pattern.is_match(title);
        let output_hit = || output.map(|o| self.pattern.is_match(o)).unwrap_or(false);
        match self.target {
            MatchTarget::Title => title_hit(),
            MatchTarget::Output => output_hit(),
            MatchTarget::Any => title_hit() || output_hit(),
        }
    }

    fn classification(&self) -> ErrorClassification {
        let mut classification = ErrorClassification::new(self.category, self.action)
            .with_pattern(format!("{}: /{}/", self.name, self.pattern.as_str()));
        classification.remediation = self.remediation.clone();
        classification
    }
}

/// Built-in rules. Title rules look for keywords anywhere in the window
/// title; output rules only fire when a capture opens with the banner, so an
/// answer that merely talks about errors is left alone.
fn default_rules() -> Result<Vec<ErrorRule>> {
    use ErrorCategory::{Authentication, Fatal, Transient, Unknown};
    use MatchTarget::{Output, Title};
    use SuggestedAction::{Abort, PromptUser, Retry};

    const SIGN_IN: &str = "sign in to the IDE, then resubmit the task";
    const RECONNECT: &str = "reconnect SSH session";
    const RESTART: &str = "restart the IDE";

    Ok(vec![
        ErrorRule::new(
            "auth-required-title",
            Title,
            r"(?i)(sign in to continue|please (log|sign) in|not logged in|session (has )?expired)",
            Authentication,
            PromptUser,
            Some(SIGN_IN),
        )?,
        ErrorRule::new(
            "auth-required",
            Output,
            r"(?i)^\s*(sign in to continue|please (log|sign) in\b|authentication (required|failed)|not logged in|(error:?\s*)?(401\b|unauthorized\b)|(your )?session (has )?expired)",
            Authentication,
            PromptUser,
            Some(SIGN_IN),
        )?,
        ErrorRule::new(
            "remote-disconnected-title",
            Title,
            r"(?i)(disconnected from ssh|reconnecting to (the )?remote|could not establish connection to)",
            Fatal,
            Abort,
            Some(RECONNECT),
        )?,
        ErrorRule::new(
            "remote-disconnected",
            Output,
            r"(?i)^\s*(could not establish connection to|ssh: connect to host|reconnecting to (the )?remote|disconnected from ssh|remote host \S+ (disconnected|closed))",
            Fatal,
            Abort,
            Some(RECONNECT),
        )?,
        ErrorRule::new(
            "crash-title",
            Title,
            r"(?i)(not responding|has crashed|quit unexpectedly|extension host terminated)",
            Fatal,
            Abort,
            Some(RESTART),
        )?,
        ErrorRule::new(
            "crash",
            Output,
            r"(?i)^\s*(extension host terminated|renderer process (crashed|gone)|the window (has crashed|is not responding))",
            Fatal,
            Abort,
            Some(RESTART),
        )?,
        ErrorRule::new(
            "rate-limit",
            Output,
            r"(?i)^\s*(rate.?limit(ed| exceeded| reached)?\b|too many requests|you('ve| have) (hit|reached) (your|the) usage limit|usage limit (reached|exceeded)|quota exceeded|(error:?\s*)?429\b)",
            Transient,
            Retry,
            Some("the model provider is throttling requests; the task will back off"),
        )?,
        ErrorRule::new(
            "network",
            Output,
            r"(?i)^\s*(connection (error|failed|reset)|network error|request timed out|service unavailable|(error:?\s*)?50[234]\b)",
            Transient,
            Retry,
            None,
        )?,
        ErrorRule::new(
            "generic-error",
            Output,
            r"(?i)^\s*(error\s*[:!]|error\s*$|something went wrong)",
            Unknown,
            Retry,
            None,
        )?,
    ])
}

/// Ordered first-match classifier over window titles and captured output.
pub struct ErrorDetector {
    rules: Vec<ErrorRule>,
    max_banner_chars: usize,
}

impl ErrorDetector {
    pub fn with_defaults(max_banner_chars: usize) -> Result<Self> {
        Ok(Self {
            rules: default_rules()?,
            max_banner_chars,
        })
    }

    /// User rules from settings first, then the built-in set.
    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        let mut rules = Vec::with_capacity(settings.error_rules.len() + 9);
        for cfg in &settings.error_rules {
            let target = match (cfg.match_title, cfg.match_output) {
                (true, true) => MatchTarget::Any,
                (true, false) => MatchTarget::Title,
                _ => MatchTarget::Output,
            };
            rules.push(ErrorRule::new(
                &cfg.name,
                target,
                &cfg.pattern,
                cfg.category,
                cfg.action,
                cfg.remediation.as_deref(),
            )?);
        }
        rules.extend(default_rules()?);
        Ok(Self {
            rules,
            max_banner_chars: settings.max_banner_chars,
        })
    }

    pub fn classify(
        &self,
        window: &WindowState,
        extraction: Option<&ExtractionResult>,
    ) -> ErrorClassification {
        self.classify_text(&window.title, extraction.map(|e| e.text.as_str()))
    }

    /// Same rules applied to a single in-flight capture.
    pub fn classify_sample(&self, window: &WindowState, sample: &str) -> ErrorClassification {
        self.classify_text(&window.title, Some(sample))
    }

    fn classify_text(&self, title: &str, output: Option<&str>) -> ErrorClassification {
        // Long answers are real content, not banners; quoting "rate limit"
        // in an explanation must not fail the task.
        let output = output
            .map(str::trim)
            .filter(|o| o.chars().count() <= self.max_banner_chars);

        for rule in &self.rules {
            if rule.matches(title, output) {
                log_info!("rule '{}' matched ({})", rule.name, rule.category.as_str());
                return rule.classification();
            }
        }
        ErrorClassification::none()
    }
}
