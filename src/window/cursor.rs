use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::models::WindowState;
use crate::settings::TargetSettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "cursor_detector";

use crate::{log_debug, log_warn};

const CPU_HISTORY_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Readiness {
    /// No process and no window.
    NotRunning,
    /// Process exists but no window yet.
    Starting,
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessActivity {
    pub running: bool,
    /// Summed over every matching process (Electron helpers included).
    pub cpu_percent: f32,
}

/// Source of process-level signals for the target application.
///
/// `sample` may block; it runs on the blocking pool.
pub trait ActivitySource: Send {
    fn sample(&mut self, process_names: &[String]) -> ProcessActivity;
}

/// Process scan through `sysinfo`.
pub struct SysinfoActivity {
    system: System,
    own_pid: u32,
}

impl SysinfoActivity {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SysinfoActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for SysinfoActivity {
    fn sample(&mut self, process_names: &[String]) -> ProcessActivity {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

        let wanted: Vec<String> = process_names.iter().map(|n| n.to_lowercase()).collect();
        let mut activity = ProcessActivity::default();

        for (pid, process) in self.system.processes() {
            if pid.as_u32() == self.own_pid {
                continue;
            }
            let name = process.name().to_string_lossy().to_lowercase();
            // "Cursor Helper (Renderer)" belongs to "Cursor".
            if wanted.iter().any(|w| name == *w || name.starts_with(&format!("{w} "))) {
                activity.running = true;
                activity.cpu_percent += process.cpu_usage();
            }
        }
        activity
    }
}

type SharedSource = Arc<Mutex<Box<dyn ActivitySource>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Combines window and process signals into a [`Readiness`] verdict.
pub struct CursorDetector {
    source: SharedSource,
    process_names: Arc<[String]>,
    busy_markers: Vec<String>,
    cpu_threshold: f32,
    cpu_history: Mutex<VecDeque<f32>>,
}

impl CursorDetector {
    pub fn new(target: &TargetSettings, source: Box<dyn ActivitySource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            process_names: target.process_names.clone().into(),
            busy_markers: target.busy_markers.clone(),
            cpu_threshold: target.busy_cpu_threshold,
            cpu_history: Mutex::new(VecDeque::with_capacity(CPU_HISTORY_LEN)),
        }
    }

    pub fn title_is_busy(&self, title: &str) -> bool {
        self.busy_markers
            .iter()
            .any(|marker| !marker.is_empty() && title.contains(marker.as_str()))
    }

    async fn sample(&self) -> ProcessActivity {
        let source = self.source.clone();
        let names = self.process_names.clone();
        match tokio::task::spawn_blocking(move || lock(&source).sample(&names)).await {
            Ok(activity) => activity,
            Err(err) => {
                log_warn!("process sample failed: {err}");
                ProcessActivity::default()
            }
        }
    }

    /// Takes one process sample and classifies the target.
    pub async fn observe(&self, window: Option<&WindowState>) -> Readiness {
        let activity = self.sample().await;
        self.classify(window, activity)
    }

    fn classify(&self, window: Option<&WindowState>, activity: ProcessActivity) -> Readiness {
        let avg_cpu = {
            let mut history = lock(&self.cpu_history);
            if activity.running {
                history.push_back(activity.cpu_percent);
                while history.len() > CPU_HISTORY_LEN {
                    history.pop_front();
                }
            } else {
                history.clear();
            }
            if history.is_empty() {
                0.0
            } else {
                history.iter().sum::<f32>() / history.len() as f32
            }
        };

        let Some(window) = window else {
            return if activity.running {
                Readiness::Starting
            } else {
                Readiness::NotRunning
            };
        };

        if self.title_is_busy(&window.title) {
            return Readiness::Busy;
        }

        log_debug!("avg cpu {:.1}% for '{}'", avg_cpu, window.title);
        if avg_cpu > self.cpu_threshold {
            Readiness::Busy
        } else {
            Readiness::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{window_titled, ScriptedActivity};

    fn detector(samples: Vec<ProcessActivity>) -> CursorDetector {
        CursorDetector::new(
            &TargetSettings::default(),
            Box::new(ScriptedActivity::new(samples)),
        )
    }

    #[tokio::test]
    async fn no_window_and_no_process_is_not_running() {
        let d = detector(vec![ProcessActivity::default()]);
        assert_eq!(d.observe(None).await, Readiness::NotRunning);
    }

    #[tokio::test]
    async fn process_without_window_is_starting() {
        let d = detector(vec![ProcessActivity {
            running: true,
            cpu_percent: 80.0,
        }]);
        assert_eq!(d.observe(None).await, Readiness::Starting);
    }

    #[tokio::test]
    async fn busy_marker_in_title_wins() {
        let d = detector(vec![ProcessActivity {
            running: true,
            cpu_percent: 0.0,
        }]);
        let window = window_titled("Generating… — proj — Cursor");
        assert_eq!(d.observe(Some(&window)).await, Readiness::Busy);
    }

    #[tokio::test]
    async fn cpu_is_averaged_over_recent_samples() {
        let busy = ProcessActivity {
            running: true,
            cpu_percent: 90.0,
        };
        let quiet = ProcessActivity {
            running: true,
            cpu_percent: 0.0,
        };
        let d = detector(vec![busy, quiet, quiet, quiet]);
        let window = window_titled("main.rs — proj — Cursor");

        assert_eq!(d.observe(Some(&window)).await, Readiness::Busy); // 90
        assert_eq!(d.observe(Some(&window)).await, Readiness::Busy); // 45
        assert_eq!(d.observe(Some(&window)).await, Readiness::Idle); // 30
        assert_eq!(d.observe(Some(&window)).await, Readiness::Idle); // 0
    }
}
