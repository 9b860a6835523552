//! Task lifecycle: the state machine, retry policy and the single-slot
//! engine that sequences detection, injection and extraction.

pub mod controller;
pub mod retry;
pub mod state;
pub mod worker;

pub use controller::{ActiveTaskView, AutomationEngine, EngineStatus, SubmitError, TaskHandle};
pub use retry::RetryPolicy;
pub use state::{AutomationTask, TaskState};
pub use worker::Components;
