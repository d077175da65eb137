//! Engine worker supervision and pipe log transport.
//!
//! This is the layer the editor talks to. [`EngineConnection::spawn`] starts
//! a control loop that owns the worker process and its pipe, and hands back an
//! [`EngineHandle`] for start/stop/restart, sending, and status observation.
//! Engine log lines arrive on the [`LogSink`] given at spawn time.
//!
//! The pieces are usable on their own as well:
//! - [`ProcessSupervisor`]: spawn, stale-instance elimination, exit watch
//! - [`PipeTransport`]: connect with timeout, receive loop, send, disconnect

pub mod config;
pub mod connection;
pub mod error;
pub mod pipe;
pub mod priority;
pub mod settings;
pub mod sink;
pub mod stale;
pub mod status;
pub mod supervisor;

#[cfg(all(test, unix))]
mod test_support;

pub use config::{
    EngineConfig, PipeConfig, SupervisorConfig, DEFAULT_CHANNEL, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_GRACE_DELAY, DEFAULT_READ_CHUNK_SIZE, DEFAULT_STOP_TIMEOUT,
};
pub use connection::{EngineConnection, EngineHandle};
pub use error::{ConnectError, EngineError, LoopError, Result, SendError, SettingsError, StartError};
pub use pipe::{ConnectionId, PipeEvent, PipeTransport};
pub use settings::{default_settings_path, EditorSettings};
pub use sink::{channel_sink, ChannelSink, LogEvent, LogOrigin, LogSink, TracingSink};
pub use stale::{find_stale, kill_stale, StaleProcess};
pub use status::{ConnectionStatus, StatusPublisher, StatusSubscription, StatusTone};
pub use supervisor::{ProcessExit, ProcessSupervisor, StopReport, SupervisorEvent, WorkerInfo};

pub use forgelink_frame::{FrameConfig, Framing, LogLevel};
pub use forgelink_transport::Endpoint;
