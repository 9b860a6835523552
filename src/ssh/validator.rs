use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{ContextChange, SshContext};
use crate::error::{AutomationError, AutomationResult};
use crate::platform::command::run_tool;
use crate::settings::SshSettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "ssh_validator";

use crate::{log_debug, log_info, log_warn};

/// Answers "can this host be reached right now".
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str, port: Option<u16>, timeout: Duration) -> Result<()>;
}

/// Non-interactive `ssh host true`; never prompts for a password.
pub struct SshProbe {
    binary: String,
    connect_timeout_secs: u64,
}

impl SshProbe {
    pub fn from_settings(settings: &SshSettings) -> Self {
        Self {
            binary: settings.ssh_binary.clone(),
            connect_timeout_secs: settings.connect_timeout_secs.max(1),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for SshProbe {
    async fn probe(&self, host: &str, port: Option<u16>, timeout: Duration) -> Result<()> {
        let connect_timeout = format!("ConnectTimeout={}", self.connect_timeout_secs);
        let port = port.map(|p| p.to_string());
        let mut args = vec!["-o", "BatchMode=yes", "-o", connect_timeout.as_str()];
        if let Some(port) = port.as_deref() {
            args.extend(["-p", port]);
        }
        args.extend([host, "true"]);
        run_tool(&self.binary, &args, None, timeout).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    remote_path: String,
    validated_at: Instant,
    validated_wall: DateTime<Utc>,
}

/// Validates remote contexts, reusing a result for `ttl` while host and path hold.
pub struct SshConnectionValidator {
    probe: Arc<dyn ReachabilityProbe>,
    ttl: Duration,
    timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl SshConnectionValidator {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            ttl,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(probe: Arc<dyn ReachabilityProbe>, settings: &SshSettings) -> Self {
        Self::new(
            probe,
            Duration::from_secs(settings.validation_ttl_secs),
            Duration::from_millis(settings.validation_timeout_ms),
        )
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drops any cached result for `host`.
    pub fn invalidate(&self, host: &str) {
        self.entries().remove(host);
    }

    fn cached(&self, context: &SshContext) -> Option<CacheEntry> {
        let entries = self.entries();
        let entry = entries.get(&context.host)?;
        let fresh = entry.validated_at.elapsed() < self.ttl;
        (fresh && entry.remote_path == context.remote_path).then(|| entry.clone())
    }

    /// Probes the host unless a fresh result for the same host and path exists.
    ///
    /// On success `context` is marked valid; on failure the cache entry is
    /// dropped so the next task probes again.
    pub async fn ensure_reachable(
        &self,
        context: &mut SshContext,
        change: &ContextChange,
    ) -> AutomationResult<()> {
        match change {
            ContextChange::PathChanged { from } => {
                log_info!("{} path changed from {}, revalidating", context.host, from);
                self.invalidate(&context.host);
            }
            ContextChange::HostChanged { from } => {
                log_info!("host changed from {} to {}, revalidating", from, context.host);
                self.invalidate(from);
                self.invalidate(&context.host);
            }
            ContextChange::First | ContextChange::Unchanged => {}
        }

        if let Some(entry) = self.cached(context) {
            log_debug!("{} validated {:?} ago, skipping probe", context.host, entry.validated_at.elapsed());
            context.valid = true;
            context.last_validated = Some(entry.validated_wall);
            return Ok(());
        }

        let outcome = tokio::time::timeout(
            self.timeout,
            self.probe.probe(&context.host, context.port, self.timeout),
        )
        .await;

        let reason = match outcome {
            Ok(Ok(())) => {
                let now = Utc::now();
                self.entries().insert(
                    context.host.clone(),
                    CacheEntry {
                        remote_path: context.remote_path.clone(),
                        validated_at: Instant::now(),
                        validated_wall: now,
                    },
                );
                context.valid = true;
                context.last_validated = Some(now);
                log_info!("{}:{} reachable", context.host, context.remote_path);
                return Ok(());
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(_) => format!("no answer within {:?}", self.timeout),
        };

        log_warn!("{} unreachable: {}", context.host, reason);
        self.invalidate(&context.host);
        context.valid = false;
        Err(AutomationError::RemoteUnreachable {
            host: context.host.clone(),
            reason,
        })
    }
}
