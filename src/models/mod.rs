pub mod classification;
pub mod extraction;
pub mod task;
pub mod window;

pub use classification::{ErrorCategory, ErrorClassification, SuggestedAction};
pub use extraction::ExtractionResult;
pub use task::{TaskDescriptor, TaskResult, TerminalState};
pub use window::{WindowBounds, WindowHandle, WindowState};
