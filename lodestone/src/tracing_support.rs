//! Logging bootstrap.
//!
//! The engine logs through `tracing` unconditionally. With the `tracing`
//! feature this module also installs a `tracing-subscriber` stack for hosts
//! that do not bring their own.

pub use tracing::{self, debug, error, info, instrument, trace, warn};

#[cfg(feature = "tracing")]
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line, colored.
    Pretty,

    Compact,

    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directives such as `lodestone=debug,info`.
    ///
    /// When `None`, `RUST_LOG` is used, falling back to `info`.
    pub directives: Option<String>,

    pub format: TracingFormat,

    pub timestamps: bool,

    /// Include the emitting module path.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            directives: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Compact output at `directives`, without timestamps.
    pub fn quiet(directives: impl Into<String>) -> Self {
        Self {
            directives: Some(directives.into()),
            format: TracingFormat::Compact,
            timestamps: false,
            ..Default::default()
        }
    }

    #[cfg(feature = "tracing")]
    fn filter(&self) -> EnvFilter {
        match &self.directives {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

/// Install a subscriber with default settings.
///
/// Fails if a global subscriber is already set.
#[cfg(feature = "tracing")]
pub fn init_subscriber() -> Result<(), TryInitError> {
    init_subscriber_with_config(TracingConfig::default())
}

#[cfg(feature = "tracing")]
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), TryInitError> {
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    let layer = match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => base.pretty().boxed(),
        (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => base.compact().boxed(),
        (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
        (TracingFormat::Json, true) => base.json().boxed(),
        (TracingFormat::Json, false) => base.json().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(config.filter()))
        .try_init()
}

/// Route logs to the test harness's captured output. Safe to call from
/// every test.
#[cfg(feature = "tracing")]
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("lodestone=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init_subscriber() -> Result<(), std::convert::Infallible> {
    Ok(())
}

#[cfg(not(feature = "tracing"))]
pub fn init_for_tests() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.format, TracingFormat::Pretty);
        assert!(config.timestamps);
        assert!(config.directives.is_none());
    }

    #[test]
    fn test_quiet_config() {
        let config = TracingConfig::quiet("lodestone=warn");
        assert_eq!(config.format, TracingFormat::Compact);
        assert!(!config.timestamps);
        assert_eq!(config.directives.as_deref(), Some("lodestone=warn"));
    }

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
    }
}
