//! Logger collaborator contract.
//!
//! The engine and the client façade log through the [`Logger`] trait so an
//! embedding application can route diagnostics anywhere. The default sink
//! forwards to the `tracing` ecosystem. Implementations must be thread-safe:
//! the engine worker and user threads both log.

use std::fmt::Arguments;

/// Severity filter for a [`Logger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Info,
    Warning,
    Error,
    /// Discards everything.
    None,
}

/// A log sink consumed by the client and the connection engine.
pub trait Logger: Send + Sync {
    /// The minimum severity this sink cares about. Callers skip message
    /// formatting entirely for records below this level.
    fn level(&self) -> LogLevel;

    fn trace(&self, message: Arguments<'_>);
    fn info(&self, message: Arguments<'_>);
    fn warning(&self, message: Arguments<'_>);
    fn error(&self, message: Arguments<'_>);
}

/// Forwards records to the `tracing` macros.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    level: LogLevel,
}

impl TracingLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for TracingLogger {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn trace(&self, message: Arguments<'_>) {
        tracing::trace!("{message}");
    }

    fn info(&self, message: Arguments<'_>) {
        tracing::info!("{message}");
    }

    fn warning(&self, message: Arguments<'_>) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: Arguments<'_>) {
        tracing::error!("{message}");
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn level(&self) -> LogLevel {
        LogLevel::None
    }

    fn trace(&self, _message: Arguments<'_>) {}
    fn info(&self, _message: Arguments<'_>) {}
    fn warning(&self, _message: Arguments<'_>) {}
    fn error(&self, _message: Arguments<'_>) {}
}

/// Level-checked logging through an `Arc<dyn Logger>`.
///
/// `log_at!(logger, Warning, "lost pipe {}", n)` formats lazily, only when
/// the sink's level admits the record.
macro_rules! log_at {
    ($logger:expr, $level:ident, $($arg:tt)*) => {
        if $logger.level() <= $crate::logging::LogLevel::$level {
            match $crate::logging::LogLevel::$level {
                $crate::logging::LogLevel::Trace => $logger.trace(format_args!($($arg)*)),
                $crate::logging::LogLevel::Info => $logger.info(format_args!($($arg)*)),
                $crate::logging::LogLevel::Warning => $logger.warning(format_args!($($arg)*)),
                $crate::logging::LogLevel::Error => $logger.error(format_args!($($arg)*)),
                $crate::logging::LogLevel::None => {}
            }
        }
    };
}

pub(crate) use log_at;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingLogger {
        records: AtomicUsize,
    }

    impl Logger for CountingLogger {
        fn level(&self) -> LogLevel {
            LogLevel::Warning
        }

        fn trace(&self, _m: Arguments<'_>) {
            self.records.fetch_add(1, Ordering::SeqCst);
        }
        fn info(&self, _m: Arguments<'_>) {
            self.records.fetch_add(1, Ordering::SeqCst);
        }
        fn warning(&self, _m: Arguments<'_>) {
            self.records.fetch_add(1, Ordering::SeqCst);
        }
        fn error(&self, _m: Arguments<'_>) {
            self.records.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn log_at_respects_level_filter() {
        let counting = Arc::new(CountingLogger::default());
        let sink: Arc<dyn Logger> = counting.clone();

        log_at!(sink, Trace, "below the filter");
        log_at!(sink, Info, "still below");
        log_at!(sink, Warning, "admitted");
        log_at!(sink, Error, "admitted too");

        assert_eq!(counting.records.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn null_logger_filters_everything() {
        assert_eq!(NullLogger.level(), LogLevel::None);
    }
}
