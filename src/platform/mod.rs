//! Host detection and the capability interface every OS backend implements.
//!
//! The backend is chosen once at startup; the rest of the crate only sees
//! `Arc<dyn AutomationBackend>`.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{WindowHandle, WindowState};
use crate::settings::TargetSettings;

pub mod command;
pub mod linux;
pub mod macos;
pub mod windows;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "platform";

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformKind {
    MacOs,
    Linux,
    Windows,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayServer {
    Quartz,
    X11,
    Wayland,
    Win32,
    Unknown,
}

/// What the selected backend can do beyond the mandatory primitives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// The focused input field can be read back after a paste.
    pub read_input_field: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub kind: PlatformKind,
    pub display_server: DisplayServer,
    pub missing_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// Cmd on macOS, Ctrl elsewhere.
    Primary,
    Ctrl,
    Shift,
    Alt,
    Meta,
}

/// A key combination such as `mod+shift+c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: Vec<Modifier>,
    pub key: String,
}

impl KeyChord {
    pub fn parse(text: &str) -> Result<Self> {
        let mut modifiers = Vec::new();
        let mut key = None;

        for part in text.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            let modifier = match part.to_ascii_lowercase().as_str() {
                "mod" => Some(Modifier::Primary),
                "ctrl" | "control" => Some(Modifier::Ctrl),
                "shift" => Some(Modifier::Shift),
                "alt" | "option" => Some(Modifier::Alt),
                "cmd" | "meta" | "super" | "win" => Some(Modifier::Meta),
                _ => None,
            };
            match modifier {
                Some(m) => modifiers.push(m),
                None if key.is_none() => key = Some(part.to_ascii_lowercase()),
                None => bail!("key chord '{text}' names more than one key"),
            }
        }

        let Some(key) = key else {
            bail!("key chord '{text}' has no key");
        };
        Ok(Self { modifiers, key })
    }

    pub fn has(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

impl std::fmt::Display for KeyChord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for m in &self.modifiers {
            let name = match m {
                Modifier::Primary => "mod",
                Modifier::Ctrl => "ctrl",
                Modifier::Shift => "shift",
                Modifier::Alt => "alt",
                Modifier::Meta => "meta",
            };
            write!(f, "{name}+")?;
        }
        f.write_str(&self.key)
    }
}

/// Capability interface over one OS's automation tooling.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Finds the first window belonging to the target, if any.
    async fn locate(&self, target: &TargetSettings) -> Result<Option<WindowState>>;

    /// Raises and focuses the window.
    async fn focus(&self, window: &WindowHandle) -> Result<()>;

    async fn send_keys(&self, window: &WindowHandle, chord: &KeyChord) -> Result<()>;

    async fn read_clipboard(&self) -> Result<String>;

    async fn write_clipboard(&self, text: &str) -> Result<()>;

    /// Contents of the focused input field; `None` when unsupported.
    async fn read_input_field(&self, _window: &WindowHandle) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct PlatformDetector;

impl PlatformDetector {
    pub fn detect() -> PlatformInfo {
        let kind = match std::env::consts::OS {
            "macos" => PlatformKind::MacOs,
            "linux" | "freebsd" | "openbsd" | "netbsd" => PlatformKind::Linux,
            "windows" => PlatformKind::Windows,
            _ => PlatformKind::Unsupported,
        };

        let display_server = match kind {
            PlatformKind::MacOs => DisplayServer::Quartz,
            PlatformKind::Windows => DisplayServer::Win32,
            PlatformKind::Linux => linux_display_server(),
            PlatformKind::Unsupported => DisplayServer::Unknown,
        };

        let required: &[&str] = match kind {
            PlatformKind::MacOs => macos::REQUIRED_TOOLS,
            PlatformKind::Linux => linux::REQUIRED_TOOLS,
            PlatformKind::Windows => windows::REQUIRED_TOOLS,
            PlatformKind::Unsupported => &[],
        };

        let missing_tools = required
            .iter()
            .filter(|tool| !command::tool_available(tool))
            .map(|tool| tool.to_string())
            .collect();

        PlatformInfo {
            kind,
            display_server,
            missing_tools,
        }
    }

    /// Picks the backend for `info`; fails when the host cannot be automated.
    pub fn select_backend(info: &PlatformInfo) -> Result<Arc<dyn AutomationBackend>> {
        if !info.missing_tools.is_empty() {
            log_warn!("missing automation tools: {:?}", info.missing_tools);
        }

        let backend: Arc<dyn AutomationBackend> = match info.kind {
            PlatformKind::MacOs => Arc::new(macos::MacOsBackend::new()),
            PlatformKind::Linux => {
                if info.display_server == DisplayServer::Wayland {
                    log_warn!("Wayland session detected; xdotool only reaches XWayland windows");
                }
                Arc::new(linux::X11Backend::new())
            }
            PlatformKind::Windows => Arc::new(windows::WindowsBackend::new()),
            PlatformKind::Unsupported => {
                bail!("unsupported host OS '{}'", std::env::consts::OS)
            }
        };

        log_info!(
            "selected {} backend ({:?}, {:?})",
            backend.name(),
            info.kind,
            info.display_server
        );
        Ok(backend)
    }
}

fn linux_display_server() -> DisplayServer {
    match std::env::var("XDG_SESSION_TYPE").ok().as_deref() {
        Some("wayland") => DisplayServer::Wayland,
        Some("x11") => DisplayServer::X11,
        _ if std::env::var_os("WAYLAND_DISPLAY").is_some() => DisplayServer::Wayland,
        _ if std::env::var_os("DISPLAY").is_some() => DisplayServer::X11,
        _ => DisplayServer::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifier_chords() {
        let chord = KeyChord::parse("mod+Shift+C").unwrap();
        assert_eq!(chord.modifiers, vec![Modifier::Primary, Modifier::Shift]);
        assert_eq!(chord.key, "c");
        assert_eq!(chord.to_string(), "mod+shift+c");

        let plain = KeyChord::parse("enter").unwrap();
        assert!(plain.modifiers.is_empty());
        assert_eq!(plain.key, "enter");
    }

    #[test]
    fn rejects_malformed_chords() {
        assert!(KeyChord::parse("mod+shift").is_err());
        assert!(KeyChord::parse("a+b").is_err());
        assert!(KeyChord::parse("").is_err());
    }

    #[test]
    fn detects_current_host() {
        let info = PlatformDetector::detect();
        if cfg!(target_os = "linux") {
            assert_eq!(info.kind, PlatformKind::Linux);
        }
        if cfg!(target_os = "macos") {
            assert_eq!(info.display_server, DisplayServer::Quartz);
        }
    }
}
