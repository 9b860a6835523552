//! macOS backend using System Events through `osascript`, plus `pbcopy`/`pbpaste`.
//!
//! Requires the Accessibility permission for the hosting terminal or binary.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use super::command::{run_tool, write_to_tool, TOOL_TIMEOUT};
use super::{AutomationBackend, Capabilities, KeyChord, Modifier};
use crate::models::{WindowBounds, WindowHandle, WindowState};
use crate::settings::TargetSettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "macos";

use crate::{log_debug, log_warn};

pub const REQUIRED_TOOLS: &[&str] = &["osascript", "pbcopy", "pbpaste"];

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct MacOsBackend;

impl MacOsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacOsBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_applescript_string(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\n', '\r'], " ")
        .chars()
        .filter(|&c| c >= ' ' || c == '\t')
        .collect()
}

async fn run_applescript(script: &str) -> Result<String> {
    run_tool("osascript", &["-e", script], None, SCRIPT_TIMEOUT).await
}

fn front_window_script(process: &str) -> String {
    let process = sanitize_applescript_string(process);
    format!(
        r#"tell application "System Events"
    if not (exists process "{process}") then return ""
    tell process "{process}"
        if (count of windows) is 0 then return ""
        set w to front window
        set p to position of w
        set s to size of w
        return (name of w) & tab & (item 1 of p) & tab & (item 2 of p) & tab & (item 1 of s) & tab & (item 2 of s) & tab & (frontmost as text)
    end tell
end tell"#
    )
}

/// Parses `title\tx\ty\tw\th\tfrontmost` as emitted by [`front_window_script`].
fn parse_front_window(line: &str) -> Option<(String, WindowBounds, bool)> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 6 {
        return None;
    }
    let num = |s: &str| s.trim().replace(',', ".").parse::<f64>().ok();
    let bounds = WindowBounds {
        x: num(fields[1])?,
        y: num(fields[2])?,
        width: num(fields[3])?,
        height: num(fields[4])?,
    };
    Some((fields[0].to_string(), bounds, fields[5].trim() == "true"))
}

fn applescript_keystroke(chord: &KeyChord) -> String {
    let mut modifiers = Vec::new();
    for m in &chord.modifiers {
        let name = match m {
            Modifier::Primary | Modifier::Meta => "command down",
            Modifier::Ctrl => "control down",
            Modifier::Shift => "shift down",
            Modifier::Alt => "option down",
        };
        if !modifiers.contains(&name) {
            modifiers.push(name);
        }
    }

    let key_code = match chord.key.as_str() {
        "enter" | "return" => Some(36),
        "backspace" => Some(51),
        "delete" | "del" => Some(117),
        "escape" | "esc" => Some(53),
        "tab" => Some(48),
        "space" => Some(49),
        _ => None,
    };

    let action = match key_code {
        Some(code) => format!("key code {code}"),
        None => format!("keystroke \"{}\"", sanitize_applescript_string(&chord.key)),
    };

    if modifiers.is_empty() {
        action
    } else {
        format!("{action} using {{{}}}", modifiers.join(", "))
    }
}

#[async_trait]
impl AutomationBackend for MacOsBackend {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_input_field: true,
        }
    }

    async fn locate(&self, target: &TargetSettings) -> Result<Option<WindowState>> {
        let title_re = Regex::new(&target.title_pattern)
            .with_context(|| format!("invalid title pattern '{}'", target.title_pattern))?;

        for process in &target.process_names {
            let out = match run_applescript(&front_window_script(process)).await {
                Ok(out) => out,
                Err(err) => {
                    log_debug!("System Events query for {} failed: {err}", process);
                    continue;
                }
            };
            let Some((title, bounds, frontmost)) = parse_front_window(&out) else {
                continue;
            };
            // Untitled Electron windows report an empty name; accept them by owner.
            if !title.is_empty() && !title_re.is_match(&title) {
                continue;
            }
            return Ok(Some(WindowState {
                handle: WindowHandle(process.clone()),
                title,
                owner_name: process.clone(),
                bounds,
                focused: frontmost,
                busy: false,
                observed_at: Utc::now(),
            }));
        }
        Ok(None)
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        let process = sanitize_applescript_string(window.as_str());
        let script = format!(
            r#"tell application "{process}" to activate
tell application "System Events" to tell process "{process}"
    set frontmost to true
    if (count of windows) > 0 then perform action "AXRaise" of front window
end tell"#
        );
        run_applescript(&script)
            .await
            .with_context(|| format!("failed to focus {window}"))?;
        Ok(())
    }

    async fn send_keys(&self, window: &WindowHandle, chord: &KeyChord) -> Result<()> {
        let process = sanitize_applescript_string(window.as_str());
        let script = format!(
            r#"tell application "System Events" to tell process "{process}" to {}"#,
            applescript_keystroke(chord)
        );
        run_applescript(&script)
            .await
            .with_context(|| format!("failed to send {chord}"))?;
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String> {
        run_tool("pbpaste", &[], None, TOOL_TIMEOUT)
            .await
            .context("failed to read clipboard")
    }

    async fn write_clipboard(&self, text: &str) -> Result<()> {
        write_to_tool("pbcopy", &[], text, TOOL_TIMEOUT)
            .await
            .context("failed to write clipboard")
    }

    async fn read_input_field(&self, window: &WindowHandle) -> Result<Option<String>> {
        let process = sanitize_applescript_string(window.as_str());
        let script = format!(
            r#"tell application "System Events" to tell process "{process}"
    set el to value of attribute "AXFocusedUIElement"
    return value of el
end tell"#
        );
        match run_applescript(&script).await {
            Ok(value) if value != "missing value" => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(err) => {
                // Electron text areas often hide AXValue; verification is skipped then.
                log_warn!("input field read-back unavailable: {err}");
                Ok(None)
            }
        }
    }
}
