//! Test-only doubles for the OS-facing seams: an in-memory IDE backend,
//! scripted process activity and a counting SSH probe.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{WindowBounds, WindowHandle, WindowState};
use crate::platform::{AutomationBackend, Capabilities, KeyChord};
use crate::settings::TargetSettings;
use crate::ssh::ReachabilityProbe;
use crate::window::{ActivitySource, ProcessActivity};

pub const IDLE_TITLE: &str = "main.rs — proj — Cursor";

pub fn window_titled(title: &str) -> WindowState {
    WindowState {
        handle: WindowHandle("0x2a00007".into()),
        title: title.to_string(),
        owner_name: "Cursor".into(),
        bounds: WindowBounds {
            x: 0.0,
            y: 0.0,
            width: 1440.0,
            height: 900.0,
        },
        focused: true,
        busy: false,
        observed_at: Utc::now(),
    }
}

pub fn idle_activity() -> ProcessActivity {
    ProcessActivity {
        running: true,
        cpu_percent: 0.0,
    }
}

/// Replays a fixed list of samples; the last one repeats forever.
pub struct ScriptedActivity {
    samples: VecDeque<ProcessActivity>,
}

impl ScriptedActivity {
    pub fn new(samples: Vec<ProcessActivity>) -> Self {
        Self {
            samples: samples.into(),
        }
    }
}

impl ActivitySource for ScriptedActivity {
    fn sample(&mut self, _process_names: &[String]) -> ProcessActivity {
        if self.samples.len() > 1 {
            self.samples.pop_front().unwrap_or_default()
        } else {
            self.samples.front().copied().unwrap_or_default()
        }
    }
}

#[derive(Default)]
struct IdeState {
    present: bool,
    titles: VecDeque<String>,
    responses: VecDeque<String>,
    /// The chat panel stays empty until the first submission.
    replies_after_submit: bool,
    clipboard: String,
    input_field: String,
    selected: bool,
    submissions: Vec<String>,
    keys: Vec<String>,
    locate_calls: u32,
    focus_calls: u32,
    paste_calls: u32,
    failing_pastes: u32,
}

impl IdeState {
    fn next_title(&mut self) -> String {
        if self.titles.len() > 1 {
            self.titles.pop_front().unwrap_or_default()
        } else {
            self.titles.front().cloned().unwrap_or_default()
        }
    }
}

/// In-memory stand-in for the IDE: an input field, a clipboard and a chat
/// panel whose "copy response" action yields scripted text.
pub struct ScriptedBackend {
    state: Mutex<IdeState>,
    read_back: bool,
}

impl ScriptedBackend {
    pub fn absent() -> Self {
        Self {
            state: Mutex::new(IdeState::default()),
            read_back: false,
        }
    }

    pub fn idle() -> Self {
        Self::with_titles(vec![IDLE_TITLE])
    }

    pub fn with_titles(titles: Vec<&str>) -> Self {
        Self {
            state: Mutex::new(IdeState {
                present: true,
                titles: titles.into_iter().map(String::from).collect(),
                ..IdeState::default()
            }),
            read_back: false,
        }
    }

    pub fn responses(self, responses: Vec<&str>) -> Self {
        self.state.lock().unwrap().responses = responses.into_iter().map(String::from).collect();
        self
    }

    /// Chat replies to submitted prompts; copying before anything was
    /// submitted finds an empty panel.
    pub fn replies(self, replies: Vec<&str>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.responses = replies.into_iter().map(String::from).collect();
            state.replies_after_submit = true;
        }
        self
    }

    /// Queues more replies behind the current ones.
    pub fn push_replies(&self, replies: Vec<&str>) {
        let mut state = self.state.lock().unwrap();
        state.responses.extend(replies.into_iter().map(String::from));
    }

    pub fn clipboard(self, text: &str) -> Self {
        self.state.lock().unwrap().clipboard = text.to_string();
        self
    }

    /// The next `n` pastes deliver only half the clipboard and then fail.
    pub fn failing_pastes(self, n: u32) -> Self {
        self.state.lock().unwrap().failing_pastes = n;
        self
    }

    pub fn with_read_back(mut self) -> Self {
        self.read_back = true;
        self
    }

    pub fn locate_calls(&self) -> u32 {
        self.state.lock().unwrap().locate_calls
    }

    pub fn focus_calls(&self) -> u32 {
        self.state.lock().unwrap().focus_calls
    }

    pub fn paste_calls(&self) -> u32 {
        self.state.lock().unwrap().paste_calls
    }

    pub fn submissions(&self) -> Vec<String> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn input_field(&self) -> String {
        self.state.lock().unwrap().input_field.clone()
    }

    pub fn current_clipboard(&self) -> String {
        self.state.lock().unwrap().clipboard.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().keys.clone()
    }
}

#[async_trait]
impl AutomationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_input_field: self.read_back,
        }
    }

    async fn locate(&self, _target: &TargetSettings) -> Result<Option<WindowState>> {
        let mut state = self.state.lock().unwrap();
        state.locate_calls += 1;
        if !state.present {
            return Ok(None);
        }
        let title = state.next_title();
        Ok(Some(window_titled(&title)))
    }

    async fn focus(&self, _window: &WindowHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.focus_calls += 1;
        if !state.present {
            bail!("no window to focus");
        }
        Ok(())
    }

    async fn send_keys(&self, _window: &WindowHandle, chord: &KeyChord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = chord.to_string();
        state.keys.push(name.clone());

        match name.as_str() {
            "mod+a" => state.selected = true,
            "backspace" => {
                if state.selected {
                    state.input_field.clear();
                } else {
                    state.input_field.pop();
                }
                state.selected = false;
            }
            "mod+v" => {
                state.paste_calls += 1;
                let text = state.clipboard.clone();
                if state.selected {
                    state.input_field.clear();
                    state.selected = false;
                }
                if state.failing_pastes > 0 {
                    state.failing_pastes -= 1;
                    let half: String = text.chars().take(text.chars().count() / 2).collect();
                    state.input_field.push_str(&half);
                    bail!("paste interrupted");
                }
                state.input_field.push_str(&text);
            }
            "enter" => {
                let submitted = std::mem::take(&mut state.input_field);
                state.submissions.push(submitted);
            }
            "mod+shift+c" => {
                if state.replies_after_submit && state.submissions.is_empty() {
                    return Ok(());
                }
                let next = if state.responses.len() > 1 {
                    state.responses.pop_front()
                } else {
                    state.responses.front().cloned()
                };
                if let Some(text) = next {
                    state.clipboard = text;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().clipboard.clone())
    }

    async fn write_clipboard(&self, text: &str) -> Result<()> {
        self.state.lock().unwrap().clipboard = text.to_string();
        Ok(())
    }

    async fn read_input_field(&self, _window: &WindowHandle) -> Result<Option<String>> {
        if !self.read_back {
            return Ok(None);
        }
        Ok(Some(self.state.lock().unwrap().input_field.clone()))
    }
}

/// Reachability probe that counts calls and fails for listed hosts.
#[derive(Default)]
pub struct CountingProbe {
    calls: AtomicU32,
    unreachable: Mutex<HashSet<String>>,
}

impl CountingProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.unreachable.lock().unwrap().insert(host.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for CountingProbe {
    async fn probe(&self, host: &str, _port: Option<u16>, _timeout: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(host) {
            bail!("ssh: connect to host {host} port 22: Connection refused");
        }
        Ok(())
    }
}
