mod commands;
pub mod engine;
pub mod error;
pub mod error_detector;
pub mod extractor;
pub mod injector;
pub mod models;
pub mod platform;
pub mod settings;
pub mod ssh;
#[cfg(test)]
mod test_support;
pub mod utils;
pub mod window;

pub use engine::{AutomationEngine, EngineStatus, RetryPolicy, SubmitError, TaskHandle, TaskState};
pub use error::{AutomationError, AutomationResult};
pub use models::{TaskDescriptor, TaskResult, TerminalState};
pub use settings::{AgentSettings, SettingsStore};

/// Binary entry point: parses the command line and runs the chosen command.
pub fn run() {
    if let Err(err) = commands::main_with_args() {
        log::error!("ide-autopilot failed: {err:#}");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
