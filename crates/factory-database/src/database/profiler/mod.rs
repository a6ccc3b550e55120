//! Per-statement telemetry.
//!
//! A profiler observes every statement a handle executes. It never changes
//! the statement's outcome: a failing [`Profiler::post`] is logged and
//! dropped by the caller.

mod memory;
mod null;
mod stdout;

pub use memory::MemoryProfiler;
pub use null::NullProfiler;
pub use stdout::StdoutProfiler;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::error::ProfilerError;
use super::value::Value;

/// Snapshot of one executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerContext {
    query: String,
    args: Vec<Value>,
    elapsed: Duration,
    caller: Option<String>,
}

impl ProfilerContext {
    pub fn new(query: impl Into<String>, args: Vec<Value>, elapsed: Duration) -> Self {
        Self {
            query: query.into(),
            args,
            elapsed,
            caller: None,
        }
    }

    /// Attach a free-form caller tag, usually `file:line`.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_micros(&self) -> u128 {
        self.elapsed.as_micros()
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Render the human-readable profile line, tagged with the emitting
    /// profiler's name:
    ///
    /// `[0.000789s] select ? [1, "x"] (src/app.rs:10) StdoutProfiler`
    pub fn format_line(&self, tag: &str) -> String {
        let args = self
            .args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let mut line = format!(
            "[{:.6}s] {} [{}]",
            self.elapsed.as_secs_f64(),
            self.query,
            args
        );
        if let Some(caller) = &self.caller {
            line.push_str(&format!(" ({caller})"));
        }
        line.push(' ');
        line.push_str(tag);
        line
    }
}

/// Receives a [`ProfilerContext`] for every executed statement.
pub trait Profiler: Send + Sync + fmt::Debug {
    /// Record or emit one statement.
    fn post(&self, ctx: &ProfilerContext) -> Result<(), ProfilerError>;

    /// Emit and clear anything buffered, returning the drained entries.
    fn flush(&self) -> Vec<ProfilerContext> {
        Vec::new()
    }

    /// Type tag included in emitted lines.
    fn name(&self) -> &'static str;
}

/// Profiler selection as found in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilerKind {
    #[default]
    None,
    Stdout,
    Memory,
}

impl ProfilerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Stdout => "stdout",
            Self::Memory => "memory",
        }
    }

    /// Instantiate the profiler; `None` means statements go unprofiled.
    pub fn build(&self) -> Option<Arc<dyn Profiler>> {
        match self {
            Self::None => None,
            Self::Stdout => Some(Arc::new(StdoutProfiler::new())),
            Self::Memory => Some(Arc::new(MemoryProfiler::new())),
        }
    }
}

impl fmt::Display for ProfilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "stdout" => Ok(Self::Stdout),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown profiler {other:?}, expected one of none, stdout, memory"
            )),
        }
    }
}

/// Shared output target for emitting profilers. `None` means stdout.
#[derive(Clone, Default)]
pub(crate) struct Sink {
    writer: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

impl Sink {
    pub(crate) fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    /// Write all lines and flush, holding the target for the whole batch.
    pub(crate) fn emit<'a, I>(&self, lines: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match &self.writer {
            Some(writer) => {
                let mut out = writer.lock();
                write_lines(&mut *out, lines)
            }
            None => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                write_lines(&mut out, lines)
            }
        }
    }
}

fn write_lines<'a, W, I>(out: &mut W, lines: I) -> std::io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a str>,
{
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.writer.is_some() { "Sink(writer)" } else { "Sink(stdout)" })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;

    /// In-memory `Write` target whose contents can be inspected.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
