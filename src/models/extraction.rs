use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub text: String,
    pub captured_at: DateTime<Utc>,
    /// True once two consecutive captures were identical.
    pub stable: bool,
    pub capture_count: u32,
    pub elapsed_ms: u64,
    /// Advisory only; never used as a retry trigger.
    pub confidence: f64,
}
