use std::time::SystemTime;

use forgelink_frame::LogLevel;
use tokio::sync::mpsc;

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrigin {
    /// Decoded from the engine's pipe.
    Engine,
    /// Produced by the editor side about the connection itself.
    Editor,
}

/// Receiver of log lines.
///
/// Called from the receive task, so implementations must not block for long.
pub trait LogSink: Send + Sync + 'static {
    /// One line of engine output, already split and trimmed.
    fn on_engine_log(&self, level: LogLevel, text: &str);

    /// A message about the connection (connected, exited, read failure).
    fn on_editor_log(&self, level: LogLevel, text: &str) {
        emit_tracing(LogOrigin::Editor, level, text);
    }
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync + 'static,
{
    fn on_engine_log(&self, level: LogLevel, text: &str) {
        self(level, text)
    }
}

/// Routes every line to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn on_engine_log(&self, level: LogLevel, text: &str) {
        emit_tracing(LogOrigin::Engine, level, text);
    }
}

fn emit_tracing(origin: LogOrigin, level: LogLevel, text: &str) {
    match (origin, level) {
        (LogOrigin::Engine, LogLevel::Trace) => tracing::trace!(target: "engine", "{text}"),
        (LogOrigin::Engine, LogLevel::Info) => tracing::info!(target: "engine", "{text}"),
        (LogOrigin::Engine, LogLevel::Warn) => tracing::warn!(target: "engine", "{text}"),
        (LogOrigin::Engine, LogLevel::Error | LogLevel::Fatal) => {
            tracing::error!(target: "engine", fatal = level == LogLevel::Fatal, "{text}")
        }
        (LogOrigin::Engine, LogLevel::Unknown(raw)) => {
            tracing::info!(target: "engine", raw_level = raw, "{text}")
        }
        (LogOrigin::Editor, LogLevel::Trace) => tracing::trace!("{text}"),
        (LogOrigin::Editor, LogLevel::Info | LogLevel::Unknown(_)) => tracing::info!("{text}"),
        (LogOrigin::Editor, LogLevel::Warn) => tracing::warn!("{text}"),
        (LogOrigin::Editor, LogLevel::Error | LogLevel::Fatal) => tracing::error!("{text}"),
    }
}

/// A log line captured by [`ChannelSink`].
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub origin: LogOrigin,
    pub level: LogLevel,
    pub text: String,
    pub timestamp: SystemTime,
}

impl LogEvent {
    /// Console form: engine lines are tagged `[<engine>] -> `, editor lines
    /// are shown as-is.
    pub fn display(&self, engine_name: &str) -> String {
        match self.origin {
            LogOrigin::Engine => format!("[{engine_name}] -> {}", self.text),
            LogOrigin::Editor => self.text.clone(),
        }
    }
}

/// Forwards every line into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl ChannelSink {
    fn push(&self, origin: LogOrigin, level: LogLevel, text: &str) {
        // Receiver gone means nobody is listening; dropping the line is fine.
        let _ = self.tx.send(LogEvent {
            origin,
            level,
            text: text.to_string(),
            timestamp: SystemTime::now(),
        });
    }
}

impl LogSink for ChannelSink {
    fn on_engine_log(&self, level: LogLevel, text: &str) {
        self.push(LogOrigin::Engine, level, text);
    }

    fn on_editor_log(&self, level: LogLevel, text: &str) {
        self.push(LogOrigin::Editor, level, text);
    }
}

pub fn channel_sink() -> (ChannelSink, mpsc::UnboundedReceiver<LogEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}
