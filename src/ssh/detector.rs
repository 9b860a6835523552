use std::path::PathBuf;

use anyhow::Result;
use regex::Regex;

use super::{ProjectContext, SshContext};
use crate::models::WindowState;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "ssh_detector";

use crate::log_debug;

/// Recognises remote workspaces from the window title marker
/// (`folder [SSH: host] — Cursor`) or from a task's context hint.
pub struct SshContextDetector {
    title_marker: Regex,
}

#[derive(Debug, PartialEq)]
struct RemoteHint {
    host: String,
    port: Option<u16>,
    path: String,
}

impl SshContextDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            title_marker: Regex::new(r"\[SSH:\s*([^\]]+?)\s*\]")?,
        })
    }

    /// A plain path hint next to an `[SSH: host]` title is the local
    /// checkout of that remote project.
    pub fn detect(&self, window: &WindowState, hint: Option<&str>) -> ProjectContext {
        let remote_hint = hint.and_then(parse_remote_hint);
        let local_hint = match remote_hint {
            Some(_) => None,
            None => hint.map(str::trim).filter(|h| !h.is_empty()).map(PathBuf::from),
        };

        let Some(caps) = self.title_marker.captures(&window.title) else {
            return match remote_hint {
                Some(h) => {
                    log_debug!("remote context from hint: {}:{}", h.host, h.path);
                    ProjectContext::Remote(into_context(h))
                }
                None => ProjectContext::Local { path: local_hint },
            };
        };

        let (title_host, marker_start) = match (caps.get(1), caps.get(0)) {
            (Some(host), Some(whole)) => (host.as_str().to_string(), whole.start()),
            _ => return ProjectContext::Local { path: None },
        };
        let folder = folder_before_marker(&window.title[..marker_start]);

        let context = match remote_hint {
            Some(h) if h.host == title_host || h.host.ends_with(&format!("@{title_host}")) => {
                into_context(h)
            }
            _ => {
                let mut context = SshContext::new(title_host, folder);
                context.local_project_path = local_hint;
                context
            }
        };
        log_debug!("remote context from title: {}:{}", context.host, context.remote_path);
        ProjectContext::Remote(context)
    }
}

fn into_context(hint: RemoteHint) -> SshContext {
    let mut context = SshContext::new(hint.host, hint.path);
    context.port = hint.port;
    context
}

/// Last title segment before the marker, e.g. `proj` in `main.rs — proj [SSH: box]`.
fn folder_before_marker(prefix: &str) -> String {
    let last = prefix.rsplit(" \u{2014} ").next().unwrap_or(prefix);
    let last = last.rsplit(" - ").next().unwrap_or(last);
    last.trim().to_string()
}

fn parse_remote_hint(hint: &str) -> Option<RemoteHint> {
    let hint = hint.trim();

    if let Some(rest) = hint.strip_prefix("vscode-remote://ssh-remote+") {
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if host.is_empty() {
            return None;
        }
        return Some(RemoteHint {
            host: host.to_string(),
            port: None,
            path: format!("/{path}"),
        });
    }

    let rest = hint.strip_prefix("ssh://")?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()),
        None => (authority, None),
    };
    if host.is_empty() {
        return None;
    }
    Some(RemoteHint {
        host: host.to_string(),
        port,
        path: format!("/{path}"),
    })
}
