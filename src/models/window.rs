use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, backend-specific window identifier (X11 window id, macOS process
/// name + window index, Win32 HWND rendered as a string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub String);

impl WindowHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowBounds {
    pub fn is_visible(&self) -> bool {
        self.width > 1.0 && self.height > 1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub handle: WindowHandle,
    pub title: String,
    pub owner_name: String,
    pub bounds: WindowBounds,
    pub focused: bool,
    pub busy: bool,
    pub observed_at: DateTime<Utc>,
}

impl WindowState {
    pub fn touch(&mut self) {
        self.observed_at = Utc::now();
    }
}
