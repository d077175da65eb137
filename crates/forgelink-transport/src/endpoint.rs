use std::fmt;

use crate::error::{Result, TransportError};

/// Suffix the engine appends to its channel name when creating the endpoint.
pub const ENDPOINT_SUFFIX: &str = "_engine";

const MAX_NAME_LEN: usize = 64;

/// Identity of a local duplex endpoint.
///
/// The name is a process-local string, never network addressable. It maps to
/// `\\.\pipe\<name>` on Windows and `<temp>/<name>.sock` on Unix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    name: String,
}

impl Endpoint {
    /// Create an endpoint from a raw pipe name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }

    /// The endpoint the engine creates for a `--pipe <channel>` launch.
    pub fn for_channel(channel: &str) -> Result<Self> {
        validate_name(channel)?;
        Self::new(format!("{channel}{ENDPOINT_SUFFIX}"))
    }

    /// The raw pipe name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem location of the socket backing this endpoint.
    #[cfg(unix)]
    pub fn socket_path(&self) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}.sock", self.name))
    }

    /// Full named pipe path.
    #[cfg(windows)]
    pub fn pipe_path(&self) -> String {
        format!(r"\\.\pipe\{}", self.name)
    }

    /// Platform address, for diagnostics and error messages.
    pub fn address(&self) -> String {
        #[cfg(unix)]
        {
            self.socket_path().display().to_string()
        }
        #[cfg(windows)]
        {
            self.pipe_path()
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("name is longer than 64 bytes")
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        Some("only ASCII letters, digits, '_', '-' and '.' are allowed")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TransportError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("address", &self.address())
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
