use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::{TaskDescriptor, TaskResult, TerminalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Queued,
    Detecting,
    Injecting,
    AwaitingResponse,
    Extracting,
    Validating,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Queued, Detecting)
                | (Detecting, Injecting)
                | (Detecting, Retrying)
                | (Injecting, AwaitingResponse)
                | (Injecting, Retrying)
                | (AwaitingResponse, Extracting)
                | (AwaitingResponse, Retrying)
                | (Extracting, Validating)
                | (Extracting, Retrying)
                | (Validating, Completed)
                | (Validating, Retrying)
                | (Retrying, Detecting)
                | (Retrying, Injecting)
        )
    }
}

impl From<TerminalState> for TaskState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => TaskState::Completed,
            TerminalState::Failed => TaskState::Failed,
            TerminalState::Cancelled => TaskState::Cancelled,
        }
    }
}

/// One submitted request, owned and mutated by the engine only.
#[derive(Debug)]
pub struct AutomationTask {
    pub id: String,
    pub prompt: String,
    pub context_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started: Instant,
    pub deadline: Instant,
    pub budget: Duration,
    pub state: TaskState,
    pub attempts: u32,
    /// Prompts actually submitted to the IDE.
    pub injections: u32,
    pub retry_delays: Vec<Duration>,
    pub result: Option<TaskResult>,
}

impl AutomationTask {
    pub fn new(descriptor: TaskDescriptor, default_deadline_ms: u64) -> Self {
        let budget = Duration::from_millis(descriptor.deadline_ms.unwrap_or(default_deadline_ms));
        let started = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: descriptor.prompt,
            context_hint: descriptor.context_hint,
            created_at: Utc::now(),
            started,
            deadline: started + budget,
            budget,
            state: TaskState::Queued,
            attempts: 0,
            injections: 0,
            retry_delays: Vec::new(),
            result: None,
        }
    }

    pub fn advance(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            bail!("illegal transition {:?} -> {:?} for task {}", self.state, next, self.id);
        }
        self.state = next;
        Ok(())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&mut self, result: TaskResult) -> TaskResult {
        self.state = result.state.into();
        self.result = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use TaskState::*;
        let path = [Queued, Detecting, Injecting, AwaitingResponse, Extracting, Validating, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(TaskState::Detecting));
            assert!(!state.can_transition_to(TaskState::Failed));
        }
    }

    #[test]
    fn retrying_resumes_at_detect_or_inject_only() {
        assert!(TaskState::Retrying.can_transition_to(TaskState::Detecting));
        assert!(TaskState::Retrying.can_transition_to(TaskState::Injecting));
        assert!(!TaskState::Retrying.can_transition_to(TaskState::AwaitingResponse));
        assert!(!TaskState::Queued.can_transition_to(TaskState::Injecting));
    }

    #[tokio::test(start_paused = true)]
    async fn task_uses_descriptor_deadline() {
        let mut task = AutomationTask::new(TaskDescriptor::new("hi").with_deadline_ms(1_000), 60_000);
        assert_eq!(task.budget, Duration::from_millis(1_000));
        assert!(task.advance(TaskState::Injecting).is_err());
        task.advance(TaskState::Detecting).unwrap();

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(task.remaining(), Duration::from_millis(600));
        assert_eq!(Uuid::parse_str(&task.id).unwrap().get_version_num(), 4);
    }
}
