use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use super::state::{AutomationTask, TaskState};
use crate::error::{AutomationError, AutomationResult, TimeoutStage};
use crate::error_detector::ErrorDetector;
use crate::extractor::ResponseExtractor;
use crate::injector::{InjectionAck, InputInjector, ResolvedKeys};
use crate::models::{ExtractionResult, TaskResult, TerminalState, WindowState};
use crate::platform::AutomationBackend;
use crate::settings::AgentSettings;
use crate::ssh::{
    ProjectContext, ReachabilityProbe, RemoteProjectTracker, SshConnectionValidator,
    SshContextDetector,
};
use crate::window::{ActivitySource, CursorDetector, WindowManager};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "engine";

use crate::{log_debug, log_info, log_warn};

/// Everything one automation cycle needs, built once per engine.
pub struct Components {
    pub windows: WindowManager,
    pub injector: InputInjector,
    pub extractor: ResponseExtractor,
    pub errors: ErrorDetector,
    pub ssh_detector: SshContextDetector,
    pub tracker: Mutex<RemoteProjectTracker>,
    pub validator: SshConnectionValidator,
    pub settings: AgentSettings,
    pub backend_name: &'static str,
}

impl Components {
    pub fn new(
        settings: AgentSettings,
        backend: Arc<dyn AutomationBackend>,
        activity: Box<dyn ActivitySource>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self> {
        settings.validate()?;
        let keys = ResolvedKeys::from_bindings(&settings.keys)?;

        let cursor = CursorDetector::new(&settings.target, activity);
        let windows = WindowManager::new(
            backend.clone(),
            cursor,
            settings.target.clone(),
            &settings.timing,
        );
        let injector = InputInjector::new(backend.clone(), keys.clone(), settings.restore_clipboard);
        let extractor = ResponseExtractor::new(backend.clone(), keys.copy_response);

        Ok(Self {
            windows,
            injector,
            extractor,
            errors: ErrorDetector::from_settings(&settings)?,
            ssh_detector: SshContextDetector::new()?,
            tracker: Mutex::new(RemoteProjectTracker::new()),
            validator: SshConnectionValidator::from_settings(probe, &settings.ssh),
            backend_name: backend.name(),
            settings,
        })
    }

    fn tracker(&self) -> MutexGuard<'_, RemoteProjectTracker> {
        match self.tracker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Where the next attempt picks up after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Detect,
    Inject,
}

pub type Progress<'a> = &'a (dyn Fn(&AutomationTask) + Send + Sync);

/// Drives `task` to a terminal state and returns its single result.
pub async fn run_task(
    components: &Components,
    task: &mut AutomationTask,
    cancel: &CancellationToken,
    progress: Progress<'_>,
) -> TaskResult {
    let mut run = TaskRun {
        c: components,
        policy: components.settings.retry_local.clone(),
        task,
        cancel,
        progress,
        window: None,
        stale_output: None,
        remote: false,
        last_delay: None,
    };
    run.execute().await
}

struct TaskRun<'a> {
    c: &'a Components,
    task: &'a mut AutomationTask,
    cancel: &'a CancellationToken,
    progress: Progress<'a>,
    policy: RetryPolicy,
    window: Option<WindowState>,
    /// Copy-out text seen before the latest submission.
    stale_output: Option<String>,
    remote: bool,
    last_delay: Option<Duration>,
}

impl TaskRun<'_> {
    async fn execute(&mut self) -> TaskResult {
        log_info!(
            "task {} started ({} chars, budget {:?})",
            self.task.id,
            self.task.prompt.chars().count(),
            self.task.budget
        );

        let mut resume = Resume::Detect;
        loop {
            self.task.attempts += 1;
            let error = match self.attempt(resume).await {
                Ok(extraction) => return self.complete(extraction),
                Err(error) => self.escalate(error),
            };

            if matches!(error, AutomationError::Cancelled) || !error.is_retryable() {
                return self.fail(error);
            }
            if !self.policy.allows_attempt(self.task.attempts + 1) {
                log_warn!(
                    "task {} exhausted {} attempts",
                    self.task.id,
                    self.policy.max_attempts
                );
                return self.fail(error);
            }

            resume = match (self.task.state, &self.window) {
                (TaskState::Injecting, Some(_)) => Resume::Inject,
                _ => Resume::Detect,
            };
            if let Err(error) = self.back_off(&error).await {
                return self.fail(error);
            }
        }
    }

    async fn attempt(&mut self, resume: Resume) -> AutomationResult<ExtractionResult> {
        if resume == Resume::Detect {
            self.enter(TaskState::Detecting)?;
            self.detect().await?;
        }

        self.enter(TaskState::Injecting)?;
        let (window, ack) = self.inject().await?;

        self.enter(TaskState::AwaitingResponse)?;
        let extraction = self.await_response(&window, &ack).await?;

        self.enter(TaskState::Extracting)?;
        let window = self.refresh_window(window).await?;

        self.enter(TaskState::Validating)?;
        let classification = self.c.errors.classify(&window, Some(&extraction));
        if !classification.is_none() {
            return Err(AutomationError::from_classification(classification));
        }
        Ok(extraction)
    }

    /// Cancellation and the overall deadline are checked at every stage boundary.
    fn enter(&mut self, next: TaskState) -> AutomationResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AutomationError::Cancelled);
        }
        if self.task.remaining().is_zero() {
            return Err(self.deadline_error());
        }
        self.task.advance(next)?;
        log_debug!("task {} -> {:?}", self.task.id, next);
        (self.progress)(&*self.task);
        Ok(())
    }

    async fn detect(&mut self) -> AutomationResult<()> {
        let located = self.c.windows.locate(self.cancel).await?;

        let context = self
            .c
            .ssh_detector
            .detect(&located, self.task.context_hint.as_deref());
        self.remote = context.is_remote();
        self.policy = if self.remote {
            self.c.settings.retry_remote.clone()
        } else {
            self.c.settings.retry_local.clone()
        };

        match context {
            ProjectContext::Remote(mut ssh) => {
                let change = self.c.tracker().observe(&ssh);
                let validation = self.c.validator.ensure_reachable(&mut ssh, &change);
                match tokio::time::timeout(self.task.remaining(), validation).await {
                    Ok(outcome) => outcome?,
                    Err(_) => return Err(self.deadline_error()),
                }
            }
            ProjectContext::Local { .. } => {
                self.c.tracker().observe_local();
            }
        }

        let timeout = self.stage_timeout(self.c.settings.timing.detect_timeout_ms);
        let ready = self
            .c
            .windows
            .wait_until_idle(&located, timeout, self.cancel)
            .await?;

        let classification = self.c.errors.classify(&ready, None);
        if !classification.is_none() {
            return Err(AutomationError::from_classification(classification));
        }

        self.window = Some(ready);
        Ok(())
    }

    async fn inject(&mut self) -> AutomationResult<(WindowState, InjectionAck)> {
        let Some(window) = self.window.clone() else {
            return Err(AutomationError::NotFound { attempts: 0 });
        };

        self.c.windows.focus(&window).await?;
        self.stale_output = self.c.extractor.snapshot(&window).await;

        if self.task.injections > 0 || self.c.injector.is_dirty() {
            log_debug!("re-entering injection for task {}, clearing input", self.task.id);
            self.c.injector.reset(&window).await?;
        }

        let ack = self.c.injector.inject(&window, &self.task.prompt).await?;
        self.task.injections += 1;
        Ok((window, ack))
    }

    async fn await_response(
        &self,
        window: &WindowState,
        ack: &InjectionAck,
    ) -> AutomationResult<ExtractionResult> {
        let timing = &self.c.settings.timing;
        let timeout = self.stage_timeout(timing.response_timeout_ms);
        let poll_interval = Duration::from_millis(timing.response_poll_interval_ms);

        let mut baseline = vec![self.task.prompt.clone()];
        baseline.extend(ack.saved_clipboard.clone());
        baseline.extend(self.stale_output.clone());

        let errors = &self.c.errors;
        let outcome = self
            .c
            .extractor
            .wait_for_stable_output(window, timeout, poll_interval, &baseline, self.cancel, |sample| {
                let classification = errors.classify_sample(window, sample);
                if classification.is_none() {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(AutomationError::from_classification(classification))
                }
            })
            .await;

        // The copy chord overwrote the clipboard during polling.
        self.c.injector.restore(ack.saved_clipboard.as_deref()).await;
        outcome
    }

    async fn refresh_window(&self, window: WindowState) -> AutomationResult<WindowState> {
        match self.c.windows.refresh().await {
            Ok(Some(current)) => Ok(current),
            Ok(None) => Err(AutomationError::NotFound { attempts: 1 }),
            Err(err) => {
                log_warn!("window refresh failed, validating last known state: {err}");
                Ok(window)
            }
        }
    }

    async fn back_off(&mut self, error: &AutomationError) -> AutomationResult<()> {
        let retry = self.task.retry_delays.len() as u32 + 1;
        let delay = self.policy.next_delay(retry, self.last_delay);
        if delay >= self.task.remaining() {
            log_warn!("task {}: backoff {:?} would pass the deadline", self.task.id, delay);
            return Err(self.deadline_error());
        }

        self.enter(TaskState::Retrying)?;
        self.task.retry_delays.push(delay);
        self.last_delay = Some(delay);
        log_warn!(
            "task {} attempt {} failed ({}), retrying in {:?}",
            self.task.id,
            self.task.attempts,
            error,
            delay
        );

        tokio::select! {
            _ = self.cancel.cancelled() => Err(AutomationError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn stage_timeout(&self, ms: u64) -> Duration {
        self.c
            .settings
            .timing
            .scaled(ms, self.remote)
            .min(self.task.remaining())
    }

    fn deadline_error(&self) -> AutomationError {
        AutomationError::TimedOut {
            stage: TimeoutStage::Task,
            after: self.task.budget,
        }
    }

    /// A retryable failure past the overall deadline becomes a task timeout.
    fn escalate(&self, error: AutomationError) -> AutomationError {
        if error.is_retryable() && self.task.remaining().is_zero() {
            log_warn!("task {} out of time after: {}", self.task.id, error);
            return self.deadline_error();
        }
        error
    }

    fn complete(&mut self, extraction: ExtractionResult) -> TaskResult {
        log_info!(
            "task {} completed after {} attempt(s), {} chars, confidence {:.2}",
            self.task.id,
            self.task.attempts,
            extraction.text.len(),
            extraction.confidence
        );
        let result = TaskResult {
            task_id: self.task.id.clone(),
            state: TerminalState::Completed,
            output: Some(extraction),
            classification: None,
            error_kind: None,
            message: Some(format!("completed in {} attempt(s)", self.task.attempts)),
            remediation: None,
            attempts: self.task.attempts,
            retry_delays_ms: self.delays_ms(),
            elapsed_ms: self.task.elapsed().as_millis() as u64,
        };
        self.publish_terminal(result)
    }

    fn fail(&mut self, error: AutomationError) -> TaskResult {
        let cancelled = matches!(error, AutomationError::Cancelled);
        let classification = error.classification();
        if cancelled {
            log_info!("task {} cancelled in {:?}", self.task.id, self.task.state);
        } else {
            log_warn!("task {} failed in {:?}: {}", self.task.id, self.task.state, error);
        }

        let result = TaskResult {
            task_id: self.task.id.clone(),
            state: if cancelled {
                TerminalState::Cancelled
            } else {
                TerminalState::Failed
            },
            output: None,
            remediation: classification.remediation.clone(),
            classification: (!cancelled).then_some(classification),
            error_kind: Some(error.kind().to_string()),
            message: Some(error.to_string()),
            attempts: self.task.attempts,
            retry_delays_ms: self.delays_ms(),
            elapsed_ms: self.task.elapsed().as_millis() as u64,
        };
        self.publish_terminal(result)
    }

    fn publish_terminal(&mut self, result: TaskResult) -> TaskResult {
        let result = self.task.finish(result);
        (self.progress)(&*self.task);
        result
    }

    fn delays_ms(&self) -> Vec<u64> {
        self.task
            .retry_delays
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect()
    }
}
