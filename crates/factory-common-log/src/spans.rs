//! Span helpers for database operations.

use std::time::{Duration, Instant};
use tracing::{debug_span, info_span, Span};

/// Longest SQL prefix recorded on a statement span.
pub const SQL_PREVIEW_LEN: usize = 120;

/// Create a span for an operation on a named database.
pub fn database_span(name: &str, operation: &str) -> Span {
    info_span!(
        "database",
        name = %name,
        op = %operation,
        error = tracing::field::Empty
    )
}

/// Create a span for a single statement.
///
/// Long SQL is cut at [`SQL_PREVIEW_LEN`] characters.
pub fn statement_span(sql: &str) -> Span {
    debug_span!("statement", sql = %sql_preview(sql))
}

/// Collapse whitespace and truncate SQL for logging.
pub fn sql_preview(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SQL_PREVIEW_LEN {
        return collapsed;
    }
    let mut preview: String = collapsed.chars().take(SQL_PREVIEW_LEN).collect();
    preview.push_str("...");
    preview
}

/// Record an error on the current span.
pub fn record_error(error: &dyn std::error::Error) {
    Span::current().record("error", tracing::field::display(error));
}

/// Timing utility for operations.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Complete the timer, log and return the duration.
    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %duration.as_millis(),
            "operation completed"
        );
        duration
    }
}
