//! Optional log sink used by the receiver.
//!
//! The receiver never logs on its own: every record goes through the sink
//! supplied in [`ReceiverConfig`](crate::ReceiverConfig), and nothing is
//! emitted when no sink was supplied.

use log::Level;
use std::fmt;
use std::sync::Arc;

/// A leveled logger capability.
///
/// Implementations must not block or panic.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Forwards records to the `log` crate facade under the `amqp_receiver` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "amqp_receiver", level, "{}", message);
    }
}

/// Adapter over the optional sink; a no-op when empty.
#[derive(Clone, Default)]
pub(crate) struct Logger {
    sink: Option<Arc<dyn LogSink>>,
}

impl Logger {
    pub(crate) fn new(sink: Option<Arc<dyn LogSink>>) -> Self {
        Self { sink }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn log(&self, level: Level, message: &str) {
        if let Some(sink) = &self.sink {
            sink.log(level, message);
        }
    }

    pub(crate) fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub(crate) fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub(crate) fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("enabled", &self.is_enabled()).finish()
    }
}
