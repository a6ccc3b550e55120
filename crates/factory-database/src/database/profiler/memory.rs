use parking_lot::Mutex;
use std::io::Write;

use super::{Profiler, ProfilerContext, Sink};
use crate::database::error::ProfilerError;

/// Buffers statements until [`flush`](Profiler::flush).
///
/// Safe to share between tasks: appends and flushes are serialized by a
/// mutex, and a flush swaps out the whole log so later posts start fresh.
#[derive(Debug, Default)]
pub struct MemoryProfiler {
    log: Mutex<Vec<ProfilerContext>>,
    sink: Sink,
}

impl MemoryProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit flushed lines to `writer` instead of stdout.
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            log: Mutex::default(),
            sink: Sink::from_writer(writer),
        }
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Copy of the current log, leaving it in place.
    pub fn snapshot(&self) -> Vec<ProfilerContext> {
        self.log.lock().clone()
    }
}

impl Profiler for MemoryProfiler {
    fn post(&self, ctx: &ProfilerContext) -> Result<(), ProfilerError> {
        self.log.lock().push(ctx.clone());
        Ok(())
    }

    fn flush(&self) -> Vec<ProfilerContext> {
        let drained = std::mem::take(&mut *self.log.lock());
        if drained.is_empty() {
            return drained;
        }

        let lines: Vec<String> = drained.iter().map(|ctx| ctx.format_line(self.name())).collect();
        if let Err(error) = self.sink.emit(lines.iter().map(String::as_str)) {
            tracing::warn!(%error, entries = drained.len(), "failed to emit flushed profile");
        }
        drained
    }

    fn name(&self) -> &'static str {
        "MemoryProfiler"
    }
}
