//! Named SQLite pools for Factory services.
//!
//! This crate provides:
//! - a retrying connector bounded by a connect deadline
//! - a process-wide registry of named pools ([`DATABASES`])
//! - per-request [`ScopedHandle`]s carrying a [`QueryContext`] and profiler
//! - statement profilers ([`StdoutProfiler`], [`MemoryProfiler`])
//! - a closure-based transaction runner
//!
//! ```no_run
//! use factory_database::{args, ConnectionOptions, QueryContext};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ConnectionOptions::builder()
//!     .dsn("sqlite://data/app.db")
//!     .retries(100)
//!     .retry_delay(Duration::from_secs(1))
//!     .build()?;
//! factory_database::register("default", &options).await?;
//!
//! let (ctx, _cancel) = QueryContext::background().with_timeout(Duration::from_secs(5));
//! let db = factory_database::must_get("default").with_context(ctx);
//! db.exec("INSERT INTO events (name) VALUES (?)", &args!["started"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;

pub use database::*;
pub use database::registry::{get, must_get, register, try_get};
