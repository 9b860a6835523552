//! Remote (SSH) workspace handling: detection, path tracking and
//! reachability validation with a bounded cache.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod detector;
pub mod tracker;
pub mod validator;

pub use detector::SshContextDetector;
pub use tracker::{ContextChange, RemoteProjectTracker};
pub use validator::{ReachabilityProbe, SshConnectionValidator, SshProbe};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshContext {
    pub host: String,
    pub port: Option<u16>,
    pub remote_path: String,
    pub local_project_path: Option<PathBuf>,
    pub valid: bool,
    pub last_validated: Option<DateTime<Utc>>,
}

impl SshContext {
    pub fn new(host: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            remote_path: remote_path.into(),
            local_project_path: None,
            valid: false,
            last_validated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ProjectContext {
    Local { path: Option<PathBuf> },
    Remote(SshContext),
}

impl ProjectContext {
    pub fn is_remote(&self) -> bool {
        matches!(self, ProjectContext::Remote(_))
    }
}
