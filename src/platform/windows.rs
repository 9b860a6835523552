//! Windows backend driven through PowerShell (`SendKeys`, `AppActivate`, clipboard cmdlets).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use super::command::{run_tool, write_to_tool};
use super::{AutomationBackend, Capabilities, KeyChord, Modifier};
use crate::models::{WindowBounds, WindowHandle, WindowState};
use crate::settings::TargetSettings;

pub const REQUIRED_TOOLS: &[&str] = &["powershell"];

// PowerShell start-up alone can take a couple of seconds on cold machines.
const PS_TIMEOUT: Duration = Duration::from_secs(20);

pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_powershell(script: &str) -> Result<String> {
    run_tool(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
        None,
        PS_TIMEOUT,
    )
    .await
}

fn ps_quote(input: &str) -> String {
    format!("'{}'", input.replace('\'', "''"))
}

fn sendkeys_sequence(chord: &KeyChord) -> Result<String> {
    let mut prefix = String::new();
    for m in &chord.modifiers {
        let symbol = match m {
            Modifier::Primary | Modifier::Ctrl => '^',
            Modifier::Shift => '+',
            Modifier::Alt => '%',
            Modifier::Meta => bail!("SendKeys cannot press the Windows key ({chord})"),
        };
        if !prefix.contains(symbol) {
            prefix.push(symbol);
        }
    }

    let key = match chord.key.as_str() {
        "enter" | "return" => "{ENTER}".to_string(),
        "backspace" => "{BACKSPACE}".to_string(),
        "delete" | "del" => "{DEL}".to_string(),
        "escape" | "esc" => "{ESC}".to_string(),
        "tab" => "{TAB}".to_string(),
        "space" => " ".to_string(),
        // SendKeys treats these as operators unless braced.
        k @ ("+" | "^" | "%" | "~" | "(" | ")" | "{" | "}" | "[" | "]") => format!("{{{k}}}"),
        other => other.to_string(),
    };
    Ok(format!("{prefix}{key}"))
}

#[async_trait]
impl AutomationBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_input_field: false,
        }
    }

    async fn locate(&self, target: &TargetSettings) -> Result<Option<WindowState>> {
        let title_re = Regex::new(&target.title_pattern)
            .with_context(|| format!("invalid title pattern '{}'", target.title_pattern))?;

        for process in &target.process_names {
            let script = format!(
                "Get-Process -Name {} -ErrorAction SilentlyContinue | \
                 Where-Object {{ $_.MainWindowHandle -ne 0 }} | \
                 ForEach-Object {{ \"$($_.Id)`t$($_.MainWindowTitle)\" }}",
                ps_quote(process)
            );
            let Ok(out) = run_powershell(&script).await else {
                continue;
            };
            for line in out.lines() {
                let Some((pid, title)) = line.split_once('\t') else {
                    continue;
                };
                if !title_re.is_match(title) {
                    continue;
                }
                return Ok(Some(WindowState {
                    handle: WindowHandle(pid.trim().to_string()),
                    title: title.to_string(),
                    owner_name: process.clone(),
                    bounds: WindowBounds::default(),
                    focused: false,
                    busy: false,
                    observed_at: Utc::now(),
                }));
            }
        }
        Ok(None)
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        let script = format!(
            "$ok = (New-Object -ComObject WScript.Shell).AppActivate([int]{}); if (-not $ok) {{ exit 1 }}",
            ps_quote(window.as_str())
        );
        run_powershell(&script)
            .await
            .with_context(|| format!("failed to activate process {window}"))?;
        Ok(())
    }

    async fn send_keys(&self, _window: &WindowHandle, chord: &KeyChord) -> Result<()> {
        let sequence = sendkeys_sequence(chord)?;
        let script = format!(
            "Add-Type -AssemblyName System.Windows.Forms; [System.Windows.Forms.SendKeys]::SendWait({})",
            ps_quote(&sequence)
        );
        run_powershell(&script)
            .await
            .with_context(|| format!("failed to send {chord}"))?;
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String> {
        Ok(run_powershell("Get-Clipboard -Raw")
            .await
            .context("failed to read clipboard")?
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }

    async fn write_clipboard(&self, text: &str) -> Result<()> {
        write_to_tool(
            "powershell",
            &[
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "[Console]::In.ReadToEnd() | Set-Clipboard",
            ],
            text,
            PS_TIMEOUT,
        )
        .await
        .context("failed to write clipboard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_chords_to_sendkeys() {
        assert_eq!(
            sendkeys_sequence(&KeyChord::parse("mod+v").unwrap()).unwrap(),
            "^v"
        );
        assert_eq!(
            sendkeys_sequence(&KeyChord::parse("mod+shift+c").unwrap()).unwrap(),
            "^+c"
        );
        assert_eq!(
            sendkeys_sequence(&KeyChord::parse("enter").unwrap()).unwrap(),
            "{ENTER}"
        );
        assert!(sendkeys_sequence(&KeyChord::parse("meta+l").unwrap()).is_err());
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(ps_quote("it's"), "'it''s'");
    }
}
