pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod fields;
pub mod handle;
pub mod options;
pub mod pool;
pub mod profiler;
pub mod registry;
pub mod transaction;
pub mod value;

pub use config::{DatabaseConfig, DatabaseEntry};
pub use connector::connect;
pub use context::{CancelHandle, QueryContext};
pub use error::*;
pub use fields::{FieldDescriptor, SqlFields};
pub use handle::ScopedHandle;
pub use options::{ConnectionOptions, ConnectionOptionsBuilder, SynchronousMode};
pub use pool::{DatabasePool, PoolHandle, PoolStats};
pub use profiler::{
    MemoryProfiler, NullProfiler, Profiler, ProfilerContext, ProfilerKind, StdoutProfiler,
};
pub use registry::{Registry, DATABASES};
pub use transaction::{BoxFuture, Transaction};
pub use value::Value;
