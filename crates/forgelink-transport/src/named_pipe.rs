use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// Listening side of an endpoint, backed by a Windows named pipe.
///
/// A fresh server instance is created after every accepted client so the
/// pipe name stays reachable.
pub struct PipeListener {
    next: NamedPipeServer,
    path: String,
}

impl PipeListener {
    /// Create the first pipe instance for the endpoint.
    ///
    /// Fails if another process already owns the pipe name.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let path = endpoint.pipe_path();
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|source| TransportError::Bind {
                address: path.clone(),
                source,
            })?;
        info!(%path, endpoint = endpoint.name(), "listening on engine endpoint");
        Ok(Self { next, path })
    }

    /// Wait for a client to connect to the current instance.
    pub async fn accept(&mut self) -> Result<PipeStream> {
        self.next.connect().await.map_err(TransportError::Accept)?;
        let replacement = ServerOptions::new()
            .create(&self.path)
            .map_err(TransportError::Accept)?;
        let connected = std::mem::replace(&mut self.next, replacement);
        debug!(path = %self.path, "accepted connection");
        Ok(PipeStream::from_server(connected))
    }

    /// The pipe path this listener serves.
    pub fn path(&self) -> &str {
        &self.path
    }
}

pub(crate) async fn connect(endpoint: &Endpoint) -> Result<PipeStream> {
    let path = endpoint.pipe_path();
    let client = ClientOptions::new()
        .open(&path)
        .map_err(|source| TransportError::Connect {
            address: path.clone(),
            source,
        })?;
    debug!(%path, "connected to engine endpoint");
    Ok(PipeStream::from_client(client))
}
