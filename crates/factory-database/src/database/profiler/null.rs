use super::{Profiler, ProfilerContext};
use crate::database::error::ProfilerError;

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProfiler;

impl Profiler for NullProfiler {
    fn post(&self, _ctx: &ProfilerContext) -> Result<(), ProfilerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NullProfiler"
    }
}
