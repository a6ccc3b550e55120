use std::io::Write;

use super::{Profiler, ProfilerContext, Sink};
use crate::database::error::ProfilerError;

/// Writes one line per statement as soon as it completes.
#[derive(Debug, Clone, Default)]
pub struct StdoutProfiler {
    sink: Sink,
}

impl StdoutProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send lines to `writer` instead of stdout.
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Sink::from_writer(writer),
        }
    }
}

impl Profiler for StdoutProfiler {
    fn post(&self, ctx: &ProfilerContext) -> Result<(), ProfilerError> {
        let line = ctx.format_line(self.name());
        self.sink.emit([line.as_str()])?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StdoutProfiler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::profiler::testing::SharedBuffer;
    use crate::Value;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_post_writes_tagged_line() {
        let buffer = SharedBuffer::default();
        let profiler = StdoutProfiler::with_writer(buffer.clone());
        let ctx = ProfilerContext::new(
            "test123",
            vec![Value::from("test456"), Value::from(789)],
            Duration::from_micros(12),
        );

        profiler.post(&ctx).unwrap();

        let output = buffer.contents();
        assert!(output.len() >= 10, "unexpectedly short output {output:?}");
        for expected in [" test123 ", "s]", "\"test456\"", " 789", "StdoutProfiler"] {
            assert!(output.contains(expected), "{expected:?} missing from {output:?}");
        }
        assert!(output.ends_with('\n'));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_reported() {
        let profiler = StdoutProfiler::with_writer(BrokenPipe);
        let ctx = ProfilerContext::new("select 1", vec![], Duration::ZERO);
        assert!(matches!(profiler.post(&ctx), Err(ProfilerError::Write(_))));
    }
}
