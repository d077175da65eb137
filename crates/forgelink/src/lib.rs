//! Launch, supervise and stream logs from the Stakeforge engine worker.
//!
//! forgelink spawns the engine executable with `--pipe <channel>`, connects
//! to the local endpoint it opens, and decodes the framed log messages it
//! writes. The editor drives it through an [`EngineHandle`] and observes it
//! through a [`LogSink`] and [`ConnectionStatus`] updates.
//!
//! # Crate Structure
//!
//! - [`transport`]: local endpoint naming, connect with timeout, listeners
//! - [`frame`]: the `[kind][level][text]` wire codec and line reassembly
//! - [`engine`]: process supervisor, pipe transport and the connection
//!   state machine
//!
//! ```no_run
//! use forgelink::{EngineConfig, EngineConnection, LogLevel};
//!
//! # async fn demo() -> forgelink::engine::Result<()> {
//! let engine = EngineConnection::spawn(
//!     EngineConfig::new("/opt/stakeforge/Stakeforge"),
//!     |level: LogLevel, text: &str| println!("[Stakeforge] -> {level}: {text}"),
//! );
//! engine.start_and_wait_connected().await?;
//! engine.send_log(LogLevel::Info, "hello from the editor").await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use forgelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use forgelink_frame::*;
}

/// Re-export engine connection types.
pub mod engine {
    pub use forgelink_engine::*;
}

pub use forgelink_engine::{
    ConnectionStatus, EditorSettings, EngineConfig, EngineConnection, EngineError, EngineHandle,
    LogEvent, LogSink, StatusTone,
};
pub use forgelink_frame::LogLevel;
