//! Small helpers shared across modules

use std::time::{Duration, Instant};

/// Timing utilities
pub struct Timer {
    start: Instant,
    description: String,
}

impl Timer {
    /// Start a new timer
    pub fn start(description: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            description: description.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log elapsed time at debug level
    pub fn log_elapsed(&self) {
        tracing::debug!(
            elapsed_ms = self.elapsed().as_millis() as u64,
            "{} completed",
            self.description
        );
    }
}

/// Pluralized item count, e.g. `1 item`, `3 items`
pub fn pluralize(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "task"), "1 task");
        assert_eq!(pluralize(0, "task"), "0 tasks");
        assert_eq!(pluralize(4, "resource"), "4 resources");
    }
}
