use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retry budget for ordinary steps that do not set their own
    pub default_attempts: u32,
    /// Delay between retries of a failed ordinary step
    pub retry_delay: Duration,
    /// How many times a job registration retries on an id collision
    pub max_id_collisions: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_attempts: 1,
            retry_delay: Duration::from_millis(0),
            max_id_collisions: 8,
        }
    }
}

impl PipelineConfig {
    /// Config with a retry budget applied to every ordinary step
    pub fn with_default_attempts(attempts: u32) -> Self {
        Self {
            default_attempts: attempts.max(1),
            ..Self::default()
        }
    }
}
