//! Lifecycle error types returned by the manager.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("component '{tag}' failed: {reason}")]
    ComponentFailure { tag: String, reason: String },

    #[error("component '{tag}' exited unexpectedly without calling work_completed")]
    ComponentDied { tag: String },

    #[error("shutdown timed out after {elapsed:?}, components still running: {remaining:?}")]
    ShutdownTimeout {
        elapsed: Duration,
        remaining: Vec<String>,
    },
}
