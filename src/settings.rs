use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use crate::engine::RetryPolicy;
use crate::models::{ErrorCategory, SuggestedAction};

pub const CONFIG_ENV: &str = "IDE_AUTOPILOT_CONFIG";
pub const DEBUG_ENV: &str = "IDE_AUTOPILOT_DEBUG";
const DEFAULT_CONFIG_FILE: &str = "ide-autopilot.json";

/// Which application is driven and how to recognise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSettings {
    /// Process / application names, matched case-insensitively.
    pub process_names: Vec<String>,
    /// Regex a window title must match.
    pub title_pattern: String,
    /// Title fragments shown while the target is generating.
    pub busy_markers: Vec<String>,
    /// Average CPU percentage above which the process counts as busy.
    pub busy_cpu_threshold: f32,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            process_names: vec!["Cursor".into(), "cursor".into()],
            title_pattern: r"(?i)cursor".into(),
            busy_markers: vec!["Generating".into(), "⏳".into()],
            busy_cpu_threshold: 35.0,
        }
    }
}

/// Key chords in `mod+shift+x` notation; `mod` is Cmd on macOS, Ctrl elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyBindings {
    pub focus_input: String,
    pub select_all: String,
    pub clear: String,
    pub paste: String,
    pub submit: String,
    pub copy_response: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            focus_input: "mod+l".into(),
            select_all: "mod+a".into(),
            clear: "backspace".into(),
            paste: "mod+v".into(),
            submit: "enter".into(),
            copy_response: "mod+shift+c".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingSettings {
    pub locate_attempts: u32,
    pub locate_interval_ms: u64,
    pub idle_poll_interval_ms: u64,
    /// Consecutive idle polls before a window counts as ready.
    pub idle_polls_required: u32,
    pub detect_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub response_poll_interval_ms: u64,
    pub response_timeout_ms: u64,
    pub task_deadline_ms: u64,
    /// Applied to detect and response timeouts in a remote context.
    pub remote_timeout_multiplier: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            locate_attempts: 3,
            locate_interval_ms: 1_000,
            idle_poll_interval_ms: 250,
            idle_polls_required: 3,
            detect_timeout_ms: 10_000,
            settle_delay_ms: 300,
            response_poll_interval_ms: 500,
            response_timeout_ms: 120_000,
            task_deadline_ms: 300_000,
            remote_timeout_multiplier: 2.0,
        }
    }
}

impl TimingSettings {
    pub fn scaled(&self, ms: u64, remote: bool) -> Duration {
        if !remote {
            return Duration::from_millis(ms);
        }
        let factor = if self.remote_timeout_multiplier.is_finite() {
            self.remote_timeout_multiplier.max(1.0)
        } else {
            1.0
        };
        Duration::from_millis((ms as f64 * factor) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshSettings {
    pub validation_ttl_secs: u64,
    pub connect_timeout_secs: u64,
    pub validation_timeout_ms: u64,
    pub ssh_binary: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            validation_ttl_secs: 300,
            connect_timeout_secs: 5,
            validation_timeout_ms: 8_000,
            ssh_binary: "ssh".into(),
        }
    }
}

/// User-supplied classification rule; evaluated before the built-in ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub match_title: bool,
    #[serde(default = "default_true")]
    pub match_output: bool,
    pub category: ErrorCategory,
    pub action: SuggestedAction,
    #[serde(default)]
    pub remediation: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub target: TargetSettings,
    pub keys: KeyBindings,
    pub timing: TimingSettings,
    pub retry_local: RetryPolicy,
    pub retry_remote: RetryPolicy,
    pub ssh: SshSettings,
    pub error_rules: Vec<ErrorRuleConfig>,
    /// Output longer than this is not scanned by output rules.
    pub max_banner_chars: usize,
    pub recent_results: usize,
    /// Put the previous clipboard content back after injection.
    pub restore_clipboard: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            target: TargetSettings::default(),
            keys: KeyBindings::default(),
            timing: TimingSettings::default(),
            retry_local: RetryPolicy::default(),
            retry_remote: RetryPolicy::remote_default(),
            ssh: SshSettings::default(),
            error_rules: Vec::new(),
            max_banner_chars: 400,
            recent_results: 20,
            restore_clipboard: true,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        self.retry_local.validate().context("invalid retryLocal")?;
        self.retry_remote.validate().context("invalid retryRemote")?;
        regex::Regex::new(&self.target.title_pattern)
            .with_context(|| format!("invalid title pattern '{}'", self.target.title_pattern))?;
        Ok(())
    }
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AgentSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = load_from(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> AgentSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn load_from(path: &Path) -> Result<AgentSettings> {
    if !path.exists() {
        return Ok(AgentSettings::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings: AgentSettings = match serde_json::from_str(&contents) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(
                "Ignoring unparsable settings at {}: {err}; using defaults",
                path.display()
            );
            AgentSettings::default()
        }
    };
    settings
        .validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(settings)
}
