use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SshContext;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "project_tracker";

use crate::log_info;

const HISTORY_LIMIT: usize = 16;

/// How the remote context differs from the previously observed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextChange {
    First,
    Unchanged,
    PathChanged { from: String },
    HostChanged { from: String },
}

impl ContextChange {
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ContextChange::PathChanged { .. } | ContextChange::HostChanged { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSwitch {
    pub host: Option<String>,
    pub remote_path: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Remembers the last remote project so switches force re-validation.
#[derive(Debug, Default)]
pub struct RemoteProjectTracker {
    current: Option<(String, String)>,
    history: VecDeque<ContextSwitch>,
}

impl RemoteProjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, context: &SshContext) -> ContextChange {
        let change = match &self.current {
            None => ContextChange::First,
            Some((host, _)) if host != &context.host => ContextChange::HostChanged { from: host.clone() },
            Some((_, path)) if path != &context.remote_path => {
                ContextChange::PathChanged { from: path.clone() }
            }
            Some(_) => ContextChange::Unchanged,
        };

        if change != ContextChange::Unchanged {
            if change.is_change() {
                log_info!(
                    "remote project switched to {}:{} ({:?})",
                    context.host,
                    context.remote_path,
                    change
                );
            }
            self.current = Some((context.host.clone(), context.remote_path.clone()));
            self.record(Some(context.host.clone()), Some(context.remote_path.clone()));
        }
        change
    }

    /// A local task ends the remote streak; the next remote one counts as new.
    pub fn observe_local(&mut self) {
        if self.current.take().is_some() {
            self.record(None, None);
        }
    }

    pub fn current(&self) -> Option<(&str, &str)> {
        self.current
            .as_ref()
            .map(|(host, path)| (host.as_str(), path.as_str()))
    }

    pub fn history(&self) -> impl Iterator<Item = &ContextSwitch> {
        self.history.iter()
    }

    fn record(&mut self, host: Option<String>, remote_path: Option<String>) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(ContextSwitch {
            host,
            remote_path,
            observed_at: Utc::now(),
        });
    }
}
