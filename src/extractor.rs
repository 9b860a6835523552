use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AutomationError, AutomationResult, TimeoutStage};
use crate::models::{ExtractionResult, WindowState};
use crate::platform::{AutomationBackend, KeyChord};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "extractor";

use crate::{log_debug, log_info, log_warn};

/// Confidence for a capture that stabilised after `captures` polls.
///
/// Two captures (the minimum) score 1.0; every extra poll lowers it.
pub fn confidence_for(captures: u32) -> f64 {
    let extra = captures.saturating_sub(2) as f64;
    (1.0 / (1.0 + 0.25 * extra)).clamp(0.0, 1.0)
}

/// Polls the copy-out channel until the streamed response stops changing.
pub struct ResponseExtractor {
    backend: Arc<dyn AutomationBackend>,
    copy_chord: KeyChord,
}

impl ResponseExtractor {
    pub fn new(backend: Arc<dyn AutomationBackend>, copy_chord: KeyChord) -> Self {
        Self {
            backend,
            copy_chord,
        }
    }

    async fn capture(&self, window: &WindowState) -> anyhow::Result<String> {
        self.backend.send_keys(&window.handle, &self.copy_chord).await?;
        self.backend.read_clipboard().await
    }

    /// What the copy-out channel yields before a prompt goes in, typically
    /// the previous answer still on screen. The user's clipboard is put back.
    pub async fn snapshot(&self, window: &WindowState) -> Option<String> {
        let saved = match self.backend.read_clipboard().await {
            Ok(saved) => saved,
            Err(err) => {
                log_warn!("could not save clipboard before snapshot: {err}");
                return None;
            }
        };
        let captured = self.capture(window).await;
        if let Err(err) = self.backend.write_clipboard(&saved).await {
            log_warn!("could not restore clipboard after snapshot: {err}");
        }

        match captured {
            Ok(text) if !text.trim().is_empty() => {
                log_debug!("panel shows {} chars before submission", text.len());
                Some(text)
            }
            Ok(_) => None,
            Err(err) => {
                log_warn!("snapshot capture failed: {err}");
                None
            }
        }
    }

    /// Waits for two consecutive, byte-identical, non-empty captures.
    ///
    /// Captures equal to an entry of `baseline` (the prompt, the clipboard
    /// from before the cycle, the pre-submission snapshot) count as empty. `observer` sees every other
    /// capture and may stop the wait early with an error.
    pub async fn wait_for_stable_output<F>(
        &self,
        window: &WindowState,
        timeout: Duration,
        poll_interval: Duration,
        baseline: &[String],
        cancel: &CancellationToken,
        mut observer: F,
    ) -> AutomationResult<ExtractionResult>
    where
        F: FnMut(&str) -> ControlFlow<AutomationError>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut previous: Option<String> = None;
        let mut captures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AutomationError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }

            if Instant::now() > deadline {
                log_warn!("no stable output after {} captures", captures);
                return Err(AutomationError::TimedOut {
                    stage: TimeoutStage::AwaitingResponse,
                    after: timeout,
                });
            }

            captures += 1;
            let text = match self.capture(window).await {
                Ok(text) => text,
                Err(err) => {
                    log_warn!("capture #{} failed: {err}", captures);
                    previous = None;
                    continue;
                }
            };

            if text.trim().is_empty() || baseline.iter().any(|b| b == &text) {
                log_debug!("capture #{} empty or baseline", captures);
                previous = None;
                continue;
            }

            if let ControlFlow::Break(err) = observer(&text) {
                log_info!("capture #{} stopped the wait: {err}", captures);
                return Err(err);
            }

            if previous.as_deref() == Some(text.as_str()) {
                let elapsed = started.elapsed();
                log_info!(
                    "output stable after {} captures ({} ms, {} chars)",
                    captures,
                    elapsed.as_millis(),
                    text.len()
                );
                return Ok(ExtractionResult {
                    text,
                    captured_at: Utc::now(),
                    stable: true,
                    capture_count: captures,
                    elapsed_ms: elapsed.as_millis() as u64,
                    confidence: confidence_for(captures),
                });
            }

            log_debug!("capture #{} changed ({} chars)", captures, text.len());
            previous = Some(text);
        }
    }
}
