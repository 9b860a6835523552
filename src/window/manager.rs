use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::cursor::{CursorDetector, Readiness};
use crate::error::{AutomationError, AutomationResult, TimeoutStage};
use crate::models::WindowState;
use crate::platform::AutomationBackend;
use crate::settings::{TargetSettings, TimingSettings};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "window_manager";

use crate::{log_debug, log_info, log_warn};

/// Finds, focuses and watches the target window.
pub struct WindowManager {
    backend: Arc<dyn AutomationBackend>,
    cursor: CursorDetector,
    target: TargetSettings,
    settle_delay: Duration,
    locate_attempts: u32,
    locate_interval: Duration,
    idle_poll_interval: Duration,
    idle_polls_required: u32,
}

impl WindowManager {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        cursor: CursorDetector,
        target: TargetSettings,
        timing: &TimingSettings,
    ) -> Self {
        Self {
            backend,
            cursor,
            target,
            settle_delay: Duration::from_millis(timing.settle_delay_ms),
            locate_attempts: timing.locate_attempts.max(1),
            locate_interval: Duration::from_millis(timing.locate_interval_ms),
            idle_poll_interval: Duration::from_millis(timing.idle_poll_interval_ms),
            idle_polls_required: timing.idle_polls_required.max(1),
        }
    }

    /// One poll of the backend plus a readiness sample; `None` if the window is gone.
    pub async fn refresh(&self) -> AutomationResult<Option<WindowState>> {
        let mut window = self.backend.locate(&self.target).await?;
        let readiness = self.cursor.observe(window.as_ref()).await;
        if let Some(window) = window.as_mut() {
            window.busy = readiness == Readiness::Busy;
            window.touch();
        }
        Ok(window)
    }

    /// Locates the target window within the configured attempt budget.
    pub async fn locate(&self, cancel: &CancellationToken) -> AutomationResult<WindowState> {
        for attempt in 1..=self.locate_attempts {
            match self.refresh().await {
                Ok(Some(window)) => {
                    log_info!(
                        "located '{}' ({}) on attempt {}",
                        window.title,
                        window.handle,
                        attempt
                    );
                    return Ok(window);
                }
                Ok(None) => log_debug!("locate attempt {} found nothing", attempt),
                Err(err) => log_warn!("locate attempt {} failed: {err}", attempt),
            }

            if attempt < self.locate_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AutomationError::Cancelled),
                    _ = tokio::time::sleep(self.locate_interval) => {}
                }
            }
        }

        Err(AutomationError::NotFound {
            attempts: self.locate_attempts,
        })
    }

    /// Brings `window` to the front and waits for keystrokes to land there.
    pub async fn focus(&self, window: &WindowState) -> AutomationResult<()> {
        self.backend.focus(&window.handle).await?;
        // Slow window managers drop keystrokes sent right after activation.
        tokio::time::sleep(self.settle_delay).await;
        log_debug!("focused {}", window.handle);
        Ok(())
    }

    /// Waits until `idle_polls_required` consecutive polls report an idle window.
    pub async fn wait_until_idle(
        &self,
        window: &WindowState,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AutomationResult<WindowState> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut consecutive_idle = 0u32;

        loop {
            let Some(current) = self.refresh().await? else {
                log_warn!("window {} disappeared while waiting for idle", window.handle);
                return Err(AutomationError::NotFound { attempts: 1 });
            };

            if current.busy {
                if consecutive_idle > 0 {
                    log_debug!("busy again after {} idle polls", consecutive_idle);
                }
                consecutive_idle = 0;
            } else {
                consecutive_idle += 1;
            }

            if consecutive_idle >= self.idle_polls_required {
                log_debug!("window ready after {:?}", started.elapsed());
                return Ok(current);
            }

            if Instant::now() + self.idle_poll_interval > deadline {
                return Err(AutomationError::TimedOut {
                    stage: TimeoutStage::Detecting,
                    after: timeout,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AutomationError::Cancelled),
                _ = tokio::time::sleep(self.idle_poll_interval) => {}
            }
        }
    }
}
