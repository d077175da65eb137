//! Local named endpoint transport for the engine link.
//!
//! Gives one interface over the local duplex mechanism used on each platform:
//! - Unix domain sockets in the temp directory (Linux/macOS)
//! - Named pipes under `\\.\pipe\` (Windows)
//!
//! This is the lowest layer of forgelink. The editor side only ever connects
//! (the engine worker owns the endpoint), but [`PipeListener`] is provided so
//! tests and the mock engine can play the worker's role.

pub mod connect;
pub mod endpoint;
pub mod error;
pub mod stream;

#[cfg(windows)]
pub mod named_pipe;
#[cfg(unix)]
pub mod uds;

pub use connect::{connect, connect_with_timeout, DEFAULT_RETRY_INTERVAL};
pub use endpoint::{Endpoint, ENDPOINT_SUFFIX};
pub use error::{Result, TransportError};
pub use stream::PipeStream;

#[cfg(windows)]
pub use named_pipe::PipeListener;
#[cfg(unix)]
pub use uds::PipeListener;
