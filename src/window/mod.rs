pub mod cursor;
pub mod manager;

pub use cursor::{ActivitySource, CursorDetector, ProcessActivity, Readiness, SysinfoActivity};
pub use manager::WindowManager;
