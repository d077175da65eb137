use std::io;

use forgelink_engine::{ConnectError, EngineError, SendError, SettingsError, StartError};
use forgelink_transport::TransportError;

/// Process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// `status` found no running engine.
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure that ends the process with `code`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { code, message }
    }

    fn with_context(code: i32, context: &str, err: impl std::fmt::Display) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::with_context(io_code(err.kind()), context, err)
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout { .. } => CliError::with_context(TIMEOUT, context, err),
        TransportError::InvalidName { .. } => CliError::with_context(USAGE, context, err),
        other => CliError::with_context(TRANSPORT_ERROR, context, other),
    }
}

pub fn connect_error(context: &str, err: ConnectError) -> CliError {
    match err {
        ConnectError::Timeout(_) => CliError::with_context(TIMEOUT, context, err),
        ConnectError::Io(err) => transport_error(context, err),
        ConnectError::AlreadyConnected | ConnectError::Cancelled => {
            CliError::with_context(FAILURE, context, err)
        }
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Start(StartError::PathInvalid { .. }) => {
            CliError::with_context(USAGE, context, err)
        }
        EngineError::Start(StartError::SpawnFailed { source, .. }) => io_error(context, source),
        EngineError::Connect(err) => connect_error(context, err),
        EngineError::Send(SendError::NotConnected) => {
            CliError::with_context(TRANSPORT_ERROR, context, err)
        }
        EngineError::Send(SendError::Io(source)) => io_error(context, source),
        EngineError::Send(SendError::Encode(_)) => CliError::with_context(DATA_INVALID, context, err),
        EngineError::Closed => CliError::with_context(INTERNAL, context, err),
        other => CliError::with_context(FAILURE, context, other),
    }
}

pub fn settings_error(context: &str, err: SettingsError) -> CliError {
    match err {
        SettingsError::Io { source, .. } => io_error(context, source),
        SettingsError::Json { .. } => CliError::with_context(DATA_INVALID, context, err),
    }
}
