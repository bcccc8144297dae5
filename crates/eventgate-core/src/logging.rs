//! Level-tagged log fan-out.
//!
//! The dispatcher takes a [`LogSink`] at construction and mirrors its
//! pipeline logging onto four typed broadcast channels, one per level.
//! Consumers subscribe to the levels they care about; the sink never affects
//! control flow. Ambient diagnostics still go through `tracing` — the sink
//! is the observational side channel exposed to embedding applications.

use serde_json::Value;
use tokio::sync::broadcast;

/// Default per-level channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Severity of a sink entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Verbose pipeline tracing.
    Debug,
    /// Normal operational messages.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures converted into error responses.
    Error,
}

/// One entry on a level channel.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity the entry was emitted at.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    pub payload: Option<Value>,
}

/// Typed, closed set of per-level broadcast channels.
///
/// Non-blocking: emitting never awaits, and entries are dropped when a level
/// has no subscribers or a subscriber lags.
pub struct LogSink {
    debug_tx: broadcast::Sender<LogEntry>,
    info_tx: broadcast::Sender<LogEntry>,
    warn_tx: broadcast::Sender<LogEntry>,
    error_tx: broadcast::Sender<LogEntry>,
}

impl LogSink {
    /// Create a sink with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a sink with a custom per-level channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (debug_tx, _) = broadcast::channel(capacity);
        let (info_tx, _) = broadcast::channel(capacity);
        let (warn_tx, _) = broadcast::channel(capacity);
        let (error_tx, _) = broadcast::channel(capacity);
        Self {
            debug_tx,
            info_tx,
            warn_tx,
            error_tx,
        }
    }

    /// Emit a debug entry.
    pub fn debug(&self, message: impl Into<String>, payload: Option<Value>) {
        self.emit(LogLevel::Debug, message.into(), payload);
    }

    /// Emit an info entry.
    pub fn info(&self, message: impl Into<String>, payload: Option<Value>) {
        self.emit(LogLevel::Info, message.into(), payload);
    }

    /// Emit a warn entry.
    pub fn warn(&self, message: impl Into<String>, payload: Option<Value>) {
        self.emit(LogLevel::Warn, message.into(), payload);
    }

    /// Emit an error entry.
    pub fn error(&self, message: impl Into<String>, payload: Option<Value>) {
        self.emit(LogLevel::Error, message.into(), payload);
    }

    /// Subscribe to debug entries.
    pub fn subscribe_debug(&self) -> broadcast::Receiver<LogEntry> {
        self.debug_tx.subscribe()
    }

    /// Subscribe to info entries.
    pub fn subscribe_info(&self) -> broadcast::Receiver<LogEntry> {
        self.info_tx.subscribe()
    }

    /// Subscribe to warn entries.
    pub fn subscribe_warn(&self) -> broadcast::Receiver<LogEntry> {
        self.warn_tx.subscribe()
    }

    /// Subscribe to error entries.
    pub fn subscribe_error(&self) -> broadcast::Receiver<LogEntry> {
        self.error_tx.subscribe()
    }

    fn emit(&self, level: LogLevel, message: String, payload: Option<Value>) {
        let tx = match level {
            LogLevel::Debug => {
                tracing::debug!(target: "eventgate::sink", message, ?payload);
                &self.debug_tx
            }
            LogLevel::Info => {
                tracing::info!(target: "eventgate::sink", message, ?payload);
                &self.info_tx
            }
            LogLevel::Warn => {
                tracing::warn!(target: "eventgate::sink", message, ?payload);
                &self.warn_tx
            }
            LogLevel::Error => {
                tracing::error!(target: "eventgate::sink", message, ?payload);
                &self.error_tx
            }
        };
        // send only fails when no subscriber exists; that is fine.
        let _ = tx.send(LogEntry {
            level,
            message,
            payload,
        });
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_and_receive_per_level() {
        let sink = LogSink::new();
        let mut info_rx = sink.subscribe_info();
        let mut error_rx = sink.subscribe_error();

        sink.info("request complete", Some(json!({"uuid": "r1"})));
        sink.error("handler failed", None);

        let entry = info_rx.recv().await.unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "request complete");
        assert_eq!(entry.payload, Some(json!({"uuid": "r1"})));

        let entry = error_rx.recv().await.unwrap();
        assert_eq!(entry.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn levels_are_isolated() {
        let sink = LogSink::new();
        let mut warn_rx = sink.subscribe_warn();

        sink.debug("noise", None);
        sink.info("noise", None);
        sink.warn("slow delivery", None);

        let entry = warn_rx.recv().await.unwrap();
        assert_eq!(entry.message, "slow delivery");
        assert!(warn_rx.try_recv().is_err());
    }

    #[test]
    fn emit_with_no_subscribers_is_noop() {
        let sink = LogSink::new();
        // Must not panic or block.
        sink.debug("unobserved", None);
        sink.error("unobserved", None);
    }

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
