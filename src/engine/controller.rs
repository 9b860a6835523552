use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::state::{AutomationTask, TaskState};
use super::worker::{self, Components};
use crate::error::AutomationResult;
use crate::models::{TaskDescriptor, TaskResult, TerminalState, WindowState};
use crate::platform::{AutomationBackend, PlatformDetector};
use crate::settings::AgentSettings;
use crate::ssh::{ProjectContext, ReachabilityProbe, SshProbe};
use crate::window::{ActivitySource, SysinfoActivity};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "engine";

use crate::{log_error, log_info};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("engine busy with task {active_task}")]
    Busy { active_task: String },

    #[error("invalid task: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskView {
    pub task_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub backend: String,
    pub active: Option<ActiveTaskView>,
    pub recent: Vec<TaskResult>,
}

struct ActiveSlot {
    task_id: String,
    state: TaskState,
    attempts: u32,
    created_at: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Shared {
    active: Option<ActiveSlot>,
    recent: VecDeque<TaskResult>,
}

impl Shared {
    fn remember(&mut self, result: TaskResult, capacity: usize) {
        while self.recent.len() >= capacity.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(result);
    }
}

struct EngineInner {
    components: Components,
    shared: Mutex<Shared>,
    recent_capacity: usize,
    default_deadline_ms: u64,
}

impl EngineInner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, task: &AutomationTask) {
        let mut shared = self.shared();
        if let Some(slot) = shared.active.as_mut().filter(|s| s.task_id == task.id) {
            slot.state = task.state;
            slot.attempts = task.attempts;
        }
    }
}

/// Frees the task slot when the worker finishes or unwinds.
struct SlotGuard {
    inner: Arc<EngineInner>,
    task_id: String,
    result: Option<TaskResult>,
}

impl SlotGuard {
    fn finish(mut self, result: TaskResult) {
        self.result = Some(result);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let capacity = self.inner.recent_capacity;
        let mut shared = self.inner.shared();
        if shared
            .active
            .as_ref()
            .is_some_and(|slot| slot.task_id == self.task_id)
        {
            shared.active = None;
        }
        if let Some(result) = self.result.take() {
            shared.remember(result, capacity);
        }
    }
}

pub struct TaskHandle {
    pub task_id: String,
    join: JoinHandle<TaskResult>,
    inner: Arc<EngineInner>,
}

impl TaskHandle {
    /// Waits for the terminal result; a crashed worker reports `Failed`.
    pub async fn wait(self) -> TaskResult {
        match self.join.await {
            Ok(result) => result,
            Err(err) => {
                log_error!("task {} worker aborted: {err}", self.task_id);
                let result = TaskResult {
                    task_id: self.task_id,
                    state: TerminalState::Failed,
                    output: None,
                    classification: None,
                    error_kind: Some("WorkerAborted".into()),
                    message: Some(err.to_string()),
                    remediation: None,
                    attempts: 0,
                    retry_delays_ms: Vec::new(),
                    elapsed_ms: 0,
                };
                self.inner
                    .shared()
                    .remember(result.clone(), self.inner.recent_capacity);
                result
            }
        }
    }
}

/// Runs one automation task at a time against the target IDE.
#[derive(Clone)]
pub struct AutomationEngine {
    inner: Arc<EngineInner>,
}

impl AutomationEngine {
    pub fn new(
        settings: AgentSettings,
        backend: Arc<dyn AutomationBackend>,
        activity: Box<dyn ActivitySource>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self> {
        let recent_capacity = settings.recent_results;
        let default_deadline_ms = settings.timing.task_deadline_ms;
        let components = Components::new(settings, backend, activity, probe)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                components,
                shared: Mutex::new(Shared::default()),
                recent_capacity,
                default_deadline_ms,
            }),
        })
    }

    /// Engine wired to the host's automation backend, process table and `ssh`.
    pub fn from_settings(settings: AgentSettings) -> Result<Self> {
        let platform = PlatformDetector::detect();
        let backend = PlatformDetector::select_backend(&platform)?;
        let probe = Arc::new(SshProbe::from_settings(&settings.ssh));
        Self::new(settings, backend, Box::new(SysinfoActivity::new()), probe)
    }

    /// Starts `descriptor` on its own tokio task; must be called inside a runtime.
    pub fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskHandle, SubmitError> {
        if descriptor.prompt.trim().is_empty() {
            return Err(SubmitError::Invalid("prompt is empty".into()));
        }
        if descriptor.deadline_ms == Some(0) {
            return Err(SubmitError::Invalid("deadline must be positive".into()));
        }

        let mut task = AutomationTask::new(descriptor, self.inner.default_deadline_ms);
        let cancel = CancellationToken::new();
        {
            let mut shared = self.inner.shared();
            if let Some(active) = &shared.active {
                return Err(SubmitError::Busy {
                    active_task: active.task_id.clone(),
                });
            }
            shared.active = Some(ActiveSlot {
                task_id: task.id.clone(),
                state: task.state,
                attempts: 0,
                created_at: task.created_at,
                started: task.started,
                cancel: cancel.clone(),
            });
        }

        let task_id = task.id.clone();
        log_info!("accepted task {}", task_id);

        let guard = SlotGuard {
            inner: self.inner.clone(),
            task_id: task_id.clone(),
            result: None,
        };
        let inner = self.inner.clone();
        let join = tokio::spawn(async move {
            let progress = |t: &AutomationTask| inner.publish(t);
            let result = worker::run_task(&inner.components, &mut task, &cancel, &progress).await;
            guard.finish(result.clone());
            result
        });

        Ok(TaskHandle {
            task_id,
            join,
            inner: self.inner.clone(),
        })
    }

    /// Submits and waits for the result.
    pub async fn run(&self, descriptor: TaskDescriptor) -> Result<TaskResult, SubmitError> {
        Ok(self.submit(descriptor)?.wait().await)
    }

    /// Requests cancellation of the active task; false when idle.
    pub fn cancel(&self) -> bool {
        let shared = self.inner.shared();
        match &shared.active {
            Some(slot) => {
                log_info!("cancelling task {} in {:?}", slot.task_id, slot.state);
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> EngineStatus {
        let shared = self.inner.shared();
        EngineStatus {
            backend: self.inner.components.backend_name.to_string(),
            active: shared.active.as_ref().map(|slot| ActiveTaskView {
                task_id: slot.task_id.clone(),
                state: slot.state,
                attempts: slot.attempts,
                created_at: slot.created_at,
                elapsed_ms: slot.started.elapsed().as_millis() as u64,
            }),
            recent: shared.recent.iter().cloned().collect(),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.inner.components.settings
    }

    /// One observation of the target window and the project it shows.
    pub async fn observe_target(
        &self,
        hint: Option<&str>,
    ) -> AutomationResult<Option<(WindowState, ProjectContext)>> {
        let components = &self.inner.components;
        let Some(window) = components.windows.refresh().await? else {
            return Ok(None);
        };
        let context = components.ssh_detector.detect(&window, hint);
        Ok(Some((window, context)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::RetryPolicy;
    use crate::models::{ErrorCategory, SuggestedAction};
    use crate::settings::TimingSettings;
    use crate::test_support::{idle_activity, CountingProbe, ScriptedActivity, ScriptedBackend};

    const PROMPT: &str = "add a unit test for parse_config";

    fn fast_settings() -> AgentSettings {
        AgentSettings {
            timing: TimingSettings {
                locate_attempts: 2,
                locate_interval_ms: 100,
                idle_poll_interval_ms: 50,
                idle_polls_required: 2,
                detect_timeout_ms: 2_000,
                settle_delay_ms: 10,
                response_poll_interval_ms: 500,
                response_timeout_ms: 3_000,
                task_deadline_ms: 60_000,
                remote_timeout_multiplier: 2.0,
            },
            retry_local: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 100,
                multiplier: 2.0,
                jitter_ms: 0,
            },
            retry_remote: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 200,
                multiplier: 2.0,
                jitter_ms: 0,
            },
            ..AgentSettings::default()
        }
    }

    fn engine_with(backend: Arc<ScriptedBackend>, probe: Arc<CountingProbe>) -> AutomationEngine {
        AutomationEngine::new(
            fast_settings(),
            backend,
            Box::new(ScriptedActivity::new(vec![idle_activity()])),
            probe,
        )
        .unwrap()
    }

    fn engine(backend: Arc<ScriptedBackend>) -> AutomationEngine {
        engine_with(backend, Arc::new(CountingProbe::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_stable_output() {
        let backend = Arc::new(ScriptedBackend::idle().replies(vec!["Added", "Added test_parse_config"]));
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        let output = result.output.unwrap();
        assert_eq!(output.text, "Added test_parse_config");
        assert!(output.stable);
        assert_eq!(result.attempts, 1);
        assert!(result.classification.is_none());
        assert_eq!(backend.submissions(), vec![PROMPT.to_string()]);
        assert_eq!(backend.current_clipboard(), "");

        let status = engine.status();
        assert!(status.active.is_none());
        assert_eq!(status.recent.len(), 1);
        assert_eq!(status.recent[0].task_id, result.task_id);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_window_fails_without_injecting() {
        let backend = Arc::new(ScriptedBackend::absent());
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.error_kind.as_deref(), Some("NotFound"));
        assert_eq!(result.attempts, 1);
        assert_eq!(backend.paste_calls(), 0);
        assert!(backend.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn injection_retry_delivers_one_clean_prompt() {
        let backend = Arc::new(ScriptedBackend::idle().failing_pastes(1).replies(vec!["done"]));
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.attempts, 2);
        assert_eq!(backend.paste_calls(), 2);
        assert_eq!(backend.focus_calls(), 2);
        assert_eq!(backend.submissions(), vec![PROMPT.to_string()]);
        // Resumed at injection; the window was not searched again.
        assert_eq!(backend.locate_calls(), 1 + 2 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backs_off_with_growing_delays() {
        // Each retry first sees the previous banner still on screen.
        let backend = Arc::new(ScriptedBackend::idle().replies(vec![
            "Too many requests. Please wait.",
            "Too many requests. Please wait.",
            "Rate limit exceeded, try again later.",
            "Rate limit exceeded, try again later.",
            "Here is the test.",
        ]));
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.retry_delays_ms, vec![100, 200]);
        assert!(result.retry_delays_ms.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(backend.submissions(), vec![PROMPT.to_string(); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_exceed_policy() {
        // The chat panel never yields anything to copy.
        let backend = Arc::new(ScriptedBackend::idle());
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error_kind.as_deref(), Some("TimedOut"));
        assert_eq!(result.retry_delays_ms.len(), 2);
        assert_eq!(backend.submissions().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn response_timeout_restarts_from_detection() {
        let backend = Arc::new(ScriptedBackend::idle());
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.attempts, 3);
        assert!(result.message.unwrap().contains("awaiting response"));
        // Every attempt located the window and waited for two idle polls.
        assert_eq!(backend.locate_calls(), 3 * (1 + 2));
        assert_eq!(backend.focus_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_window_uses_remote_policy_and_wider_timeouts() {
        let backend = Arc::new(ScriptedBackend::with_titles(vec![
            "main.rs — api [SSH: devbox] — Cursor",
        ]));
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.error_kind.as_deref(), Some("TimedOut"));
        assert_eq!(result.attempts, 2);
        assert_eq!(result.retry_delays_ms, vec![200]);
        assert!(result.message.unwrap().contains("after 6s"));
        assert!(result.elapsed_ms >= 2 * 6_000);
        assert_eq!(backend.submissions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_prompt_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::idle().replies(vec!["Please sign in to continue"]));
        let engine = engine(backend.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error_kind.as_deref(), Some("AuthenticationRequired"));
        let classification = result.classification.unwrap();
        assert_eq!(classification.category, ErrorCategory::Authentication);
        assert_eq!(classification.action, SuggestedAction::PromptUser);
        assert!(result.remediation.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_stops_retries() {
        let backend = Arc::new(ScriptedBackend::idle());
        let engine = engine(backend.clone());

        let result = engine
            .run(TaskDescriptor::new(PROMPT).with_deadline_ms(1_500))
            .await
            .unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.attempts, 1);
        assert!(result.message.unwrap().contains("task deadline"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_reported_as_cancelled() {
        let backend = Arc::new(ScriptedBackend::idle());
        let engine = engine(backend);

        let handle = engine.submit(TaskDescriptor::new(PROMPT)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(engine.cancel());

        let result = handle.wait().await;
        assert_eq!(result.state, TerminalState::Cancelled);
        assert!(result.classification.is_none());
        assert!(!engine.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_engine_rejects_second_submission() {
        let backend = Arc::new(ScriptedBackend::idle());
        let engine = engine(backend);

        let first = engine.submit(TaskDescriptor::new(PROMPT)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = engine.status();
        let active = status.active.unwrap();
        assert_eq!(active.task_id, first.task_id);
        assert!(!active.state.is_terminal());

        match engine.submit(TaskDescriptor::new("another prompt")) {
            Err(SubmitError::Busy { active_task }) => assert_eq!(active_task, first.task_id),
            other => panic!("expected busy, got {:?}", other.map(|h| h.task_id)),
        }

        engine.cancel();
        first.wait().await;
        assert!(engine.status().active.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn observe_target_reports_remote_context() {
        let backend = Arc::new(ScriptedBackend::with_titles(vec!["lib.rs — api [SSH: devbox] — Cursor"]));
        let engine = engine(backend);

        let (window, context) = engine.observe_target(None).await.unwrap().unwrap();
        assert!(!window.busy);
        assert!(context.is_remote());

        let absent = engine_with(Arc::new(ScriptedBackend::absent()), Arc::new(CountingProbe::new()));
        assert!(absent.observe_target(None).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_prompt_is_invalid() {
        let engine = engine(Arc::new(ScriptedBackend::idle()));
        assert!(matches!(
            engine.submit(TaskDescriptor::new("  ")),
            Err(SubmitError::Invalid(_))
        ));
        assert!(engine.status().active.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_remote_fails_before_injection() {
        let backend = Arc::new(
            ScriptedBackend::with_titles(vec!["main.rs — api [SSH: devbox] — Cursor"])
                .replies(vec!["ok"]),
        );
        let probe = Arc::new(CountingProbe::new().unreachable("devbox"));
        let engine = engine_with(backend.clone(), probe.clone());

        let result = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.error_kind.as_deref(), Some("RemoteUnreachable"));
        assert_eq!(
            result.remediation.as_deref(),
            Some("reconnect SSH session to devbox")
        );
        assert_eq!(backend.paste_calls(), 0);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_validation_is_cached_across_tasks() {
        let backend = Arc::new(
            ScriptedBackend::with_titles(vec!["main.rs — api [SSH: devbox] — Cursor"])
                .replies(vec!["first answer"]),
        );
        let probe = Arc::new(CountingProbe::new());
        let engine = engine_with(backend.clone(), probe.clone());

        let first = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();
        assert_eq!(first.state, TerminalState::Completed);
        backend.push_replies(vec!["second answer"]);
        let second = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();
        assert_eq!(second.state, TerminalState::Completed);
        assert_eq!(probe.calls(), 1);

        backend.push_replies(vec!["third answer"]);
        let switched = engine
            .run(TaskDescriptor::new(PROMPT).with_context("vscode-remote://ssh-remote+devbox/srv/other"))
            .await
            .unwrap();
        assert_eq!(switched.state, TerminalState::Completed);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn previous_answer_on_screen_is_not_the_new_response() {
        let backend = Arc::new(ScriptedBackend::idle().replies(vec!["Answer to task one"]));
        let engine = engine(backend.clone());

        let first = engine.run(TaskDescriptor::new(PROMPT)).await.unwrap();
        assert_eq!(first.output.unwrap().text, "Answer to task one");

        // The panel still shows the old answer for two polls after the submit.
        backend.push_replies(vec![
            "Answer to task one",
            "Answer to task one",
            "Answer to task two",
        ]);
        let second = engine
            .run(TaskDescriptor::new("now document parse_config"))
            .await
            .unwrap();

        assert_eq!(second.state, TerminalState::Completed);
        assert_eq!(second.attempts, 1);
        assert_eq!(second.output.unwrap().text, "Answer to task two");
        assert_eq!(backend.current_clipboard(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_worker_is_kept_in_recent_results() {
        let engine = engine(Arc::new(ScriptedBackend::idle()));

        let handle = engine.submit(TaskDescriptor::new(PROMPT)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.join.abort();
        let result = handle.wait().await;

        assert_eq!(result.state, TerminalState::Failed);
        assert_eq!(result.error_kind.as_deref(), Some("WorkerAborted"));
        let status = engine.status();
        assert!(status.active.is_none());
        assert_eq!(status.recent.len(), 1);
        assert_eq!(status.recent[0].task_id, result.task_id);
    }
}
