//! X11 backend driven through `xdotool` and `xclip`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use super::command::{run_tool, write_to_tool, TOOL_TIMEOUT};
use super::{AutomationBackend, Capabilities, KeyChord, Modifier};
use crate::models::{WindowBounds, WindowHandle, WindowState};
use crate::settings::TargetSettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "x11";

use crate::log_debug;

pub const REQUIRED_TOOLS: &[&str] = &["xdotool", "xclip"];

pub struct X11Backend;

impl X11Backend {
    pub fn new() -> Self {
        Self
    }

    async fn window_ids_for_class(&self, class: &str) -> Vec<String> {
        // xdotool exits 1 when nothing matches; that is not an error here.
        match run_tool(
            "xdotool",
            &["search", "--onlyvisible", "--class", class],
            None,
            TOOL_TIMEOUT,
        )
        .await
        {
            Ok(out) => out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect(),
            Err(err) => {
                log_debug!("no windows for class {}: {err}", class);
                Vec::new()
            }
        }
    }

    async fn geometry(&self, id: &str) -> Result<WindowBounds> {
        let out = run_tool(
            "xdotool",
            &["getwindowgeometry", "--shell", id],
            None,
            TOOL_TIMEOUT,
        )
        .await?;
        Ok(parse_geometry(&out))
    }
}

impl Default for X11Backend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationBackend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_input_field: false,
        }
    }

    async fn locate(&self, target: &TargetSettings) -> Result<Option<WindowState>> {
        let title_re = Regex::new(&target.title_pattern)
            .with_context(|| format!("invalid title pattern '{}'", target.title_pattern))?;

        let active = run_tool("xdotool", &["getactivewindow"], None, TOOL_TIMEOUT)
            .await
            .unwrap_or_default();

        for class in &target.process_names {
            for id in self.window_ids_for_class(class).await {
                let title = match run_tool("xdotool", &["getwindowname", &id], None, TOOL_TIMEOUT).await {
                    Ok(title) => title,
                    Err(_) => continue,
                };
                if !title_re.is_match(&title) {
                    continue;
                }

                let bounds = self.geometry(&id).await.unwrap_or_default();
                return Ok(Some(WindowState {
                    focused: active.trim() == id,
                    handle: WindowHandle(id),
                    title,
                    owner_name: class.clone(),
                    bounds,
                    busy: false,
                    observed_at: Utc::now(),
                }));
            }
        }

        Ok(None)
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        run_tool(
            "xdotool",
            &["windowactivate", "--sync", window.as_str()],
            None,
            TOOL_TIMEOUT,
        )
        .await
        .with_context(|| format!("failed to activate window {window}"))?;
        Ok(())
    }

    async fn send_keys(&self, _window: &WindowHandle, chord: &KeyChord) -> Result<()> {
        // Sent to the active window; XSendEvent with --window is ignored by
        // most Electron apps.
        let keys = xdotool_chord(chord);
        run_tool(
            "xdotool",
            &["key", "--clearmodifiers", &keys],
            None,
            TOOL_TIMEOUT,
        )
        .await
        .with_context(|| format!("failed to send {chord}"))?;
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String> {
        // An empty selection makes xclip fail; report it as empty text.
        Ok(run_tool(
            "xclip",
            &["-selection", "clipboard", "-o"],
            None,
            TOOL_TIMEOUT,
        )
        .await
        .unwrap_or_default())
    }

    async fn write_clipboard(&self, text: &str) -> Result<()> {
        write_to_tool("xclip", &["-selection", "clipboard", "-i"], text, TOOL_TIMEOUT)
            .await
            .context("failed to write clipboard")
    }
}

fn xdotool_chord(chord: &KeyChord) -> String {
    let mut parts: Vec<String> = chord
        .modifiers
        .iter()
        .map(|m| {
            match m {
                Modifier::Primary | Modifier::Ctrl => "ctrl",
                Modifier::Shift => "shift",
                Modifier::Alt => "alt",
                Modifier::Meta => "super",
            }
            .to_string()
        })
        .collect();

    let key = match chord.key.as_str() {
        "enter" | "return" => "Return".to_string(),
        "backspace" => "BackSpace".to_string(),
        "delete" | "del" => "Delete".to_string(),
        "escape" | "esc" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => "space".to_string(),
        other => other.to_string(),
    };
    parts.push(key);
    parts.join("+")
}

fn parse_geometry(shell_output: &str) -> WindowBounds {
    let mut bounds = WindowBounds::default();
    for line in shell_output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<f64>() else {
            continue;
        };
        match key.trim() {
            "X" => bounds.x = value,
            "Y" => bounds.y = value,
            "WIDTH" => bounds.width = value,
            "HEIGHT" => bounds.height = value,
            _ => {}
        }
    }
    bounds
}
