use std::time::Duration;

use super::error::ConnectError;
use super::profiler::ProfilerKind;

/// How to reach and verify one named database.
///
/// Built through [`ConnectionOptions::builder`], which validates; immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    dsn: String,
    profiler: ProfilerKind,
    retries: u32,
    retry_delay: Duration,
    connect_timeout: Duration,
    min_connections: u32,
    max_connections: u32,
    acquire_timeout: Duration,
    idle_timeout: Option<Duration>,
    max_lifetime: Option<Duration>,
    busy_timeout: Duration,
    wal_mode: bool,
    synchronous: SynchronousMode,
    create_if_missing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynchronousMode {
    Off,
    Normal,
    #[default]
    Full,
    Extra,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            dsn: "sqlite://factory.db".to_string(),
            profiler: ProfilerKind::None,
            retries: 0,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
            busy_timeout: Duration::from_secs(5),
            wal_mode: true,
            synchronous: SynchronousMode::Full,
            create_if_missing: true,
        }
    }
}

impl ConnectionOptions {
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }

    /// Shorthand for validated defaults pointing at `dsn`.
    pub fn new(dsn: impl Into<String>) -> Result<Self, ConnectError> {
        Self::builder().dsn(dsn).build()
    }

    /// A single private in-memory database.
    ///
    /// Pinned to one connection that is never recycled, since every SQLite
    /// memory connection is its own database.
    pub fn in_memory() -> Self {
        Self {
            dsn: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            idle_timeout: None,
            max_lifetime: None,
            wal_mode: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.dsn.trim().is_empty() {
            return Err(ConnectError::InvalidOptions("dsn cannot be empty".to_string()));
        }

        if !self.dsn.starts_with("sqlite:") {
            return Err(ConnectError::InvalidOptions(format!(
                "unsupported dsn {:?}, expected a sqlite: url",
                self.dsn
            )));
        }

        if self.max_connections == 0 {
            return Err(ConnectError::InvalidOptions(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConnectError::InvalidOptions(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        Ok(())
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn profiler(&self) -> ProfilerKind {
        self.profiler
    }

    /// Retries after the first attempt; total attempts are `retries + 1`.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Bound on the whole connect sequence. Zero disables the bound.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn min_connections(&self) -> u32 {
        self.min_connections
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn wal_mode(&self) -> bool {
        self.wal_mode
    }

    pub fn synchronous(&self) -> SynchronousMode {
        self.synchronous
    }

    pub fn create_if_missing(&self) -> bool {
        self.create_if_missing
    }

    /// Builder seeded with these options.
    pub fn to_builder(&self) -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder {
            options: self.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.options.dsn = dsn.into();
        self
    }

    pub fn profiler(mut self, profiler: ProfilerKind) -> Self {
        self.options.profiler = profiler;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.options.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.options.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.options.acquire_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.options.max_lifetime = lifetime;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.options.busy_timeout = timeout;
        self
    }

    pub fn wal_mode(mut self, enabled: bool) -> Self {
        self.options.wal_mode = enabled;
        self
    }

    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.options.synchronous = mode;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.options.create_if_missing = create;
        self
    }

    pub fn build(self) -> Result<ConnectionOptions, ConnectError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = ConnectionOptions::builder()
            .dsn("sqlite://app.db")
            .profiler(ProfilerKind::Stdout)
            .retries(100)
            .retry_delay(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(120))
            .max_connections(5)
            .wal_mode(false)
            .build()
            .unwrap();

        assert_eq!(options.dsn(), "sqlite://app.db");
        assert_eq!(options.profiler(), ProfilerKind::Stdout);
        assert_eq!(options.retries(), 100);
        assert_eq!(options.connect_timeout(), Duration::from_secs(120));
        assert_eq!(options.max_connections(), 5);
        assert!(!options.wal_mode());
    }

    #[test]
    fn test_validation() {
        let result = ConnectionOptions::builder()
            .min_connections(10)
            .max_connections(5)
            .build();
        assert!(matches!(result, Err(ConnectError::InvalidOptions(_))));

        assert!(ConnectionOptions::builder().max_connections(0).build().is_err());
        assert!(ConnectionOptions::new("  ").is_err());
        assert!(ConnectionOptions::new("postgres://localhost/app").is_err());
    }

    #[test]
    fn test_in_memory_is_single_connection() {
        let options = ConnectionOptions::in_memory();
        assert_eq!(options.max_connections(), 1);
        assert!(options.idle_timeout().is_none());
        options.validate().unwrap();
    }

    #[test]
    fn test_to_builder_does_not_touch_original() {
        let original = ConnectionOptions::new("sqlite://a.db").unwrap();
        let derived = original.to_builder().retries(3).build().unwrap();
        assert_eq!(original.retries(), 0);
        assert_eq!(derived.retries(), 3);
        assert_eq!(derived.dsn(), "sqlite://a.db");
    }
}
