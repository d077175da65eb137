use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A connected duplex endpoint stream. Implements `AsyncRead + AsyncWrite`.
///
/// On Unix this wraps a Unix domain socket stream.
/// On Windows this wraps either end of a named pipe.
pub struct PipeStream {
    inner: PipeStreamInner,
}

enum PipeStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Client(tokio::net::windows::named_pipe::NamedPipeClient),
    #[cfg(windows)]
    Server(tokio::net::windows::named_pipe::NamedPipeServer),
}

impl PipeStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: PipeStreamInner::Unix(stream),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_client(client: tokio::net::windows::named_pipe::NamedPipeClient) -> Self {
        Self {
            inner: PipeStreamInner::Client(client),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_server(server: tokio::net::windows::named_pipe::NamedPipeServer) -> Self {
        Self {
            inner: PipeStreamInner::Server(server),
        }
    }

    /// Build a connected pair of streams, one for each side.
    ///
    /// Used to exercise protocol code without binding a named endpoint.
    #[cfg(unix)]
    pub fn pair() -> io::Result<(Self, Self)> {
        let (left, right) = tokio::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(windows)]
            PipeStreamInner::Client(_) | PipeStreamInner::Server(_) => "named-pipe",
        }
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::Client(pipe) => Pin::new(pipe).poll_read(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::Server(pipe) => Pin::new(pipe).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::Client(pipe) => Pin::new(pipe).poll_write(cx, buf),
            #[cfg(windows)]
            PipeStreamInner::Server(pipe) => Pin::new(pipe).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(windows)]
            PipeStreamInner::Client(pipe) => Pin::new(pipe).poll_flush(cx),
            #[cfg(windows)]
            PipeStreamInner::Server(pipe) => Pin::new(pipe).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(windows)]
            PipeStreamInner::Client(pipe) => Pin::new(pipe).poll_shutdown(cx),
            #[cfg(windows)]
            PipeStreamInner::Server(pipe) => Pin::new(pipe).poll_shutdown(cx),
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for PipeStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match &self.inner {
            PipeStreamInner::Unix(stream) => std::os::fd::AsRawFd::as_raw_fd(stream),
        }
    }
}

impl std::fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
