use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use forgelink_frame::{Frame, LogLevel, ReceiveBuffer};
use forgelink_transport::{connect_with_timeout, Endpoint, PipeStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipeConfig;
use crate::error::{ConnectError, LoopError, SendError};
use crate::sink::LogSink;

/// Identifies one open connection. A disconnect notice carrying an older id
/// refers to a connection that has already been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notices posted to the transport's observer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEvent {
    /// The connection was closed, by either side.
    Disconnected { id: ConnectionId },
}

type Writer = Arc<tokio::sync::Mutex<WriteHalf<PipeStream>>>;

struct Open {
    id: ConnectionId,
    cancel: CancellationToken,
    /// Taken by the receive loop when it starts.
    reader: Option<ReadHalf<PipeStream>>,
    writer: Writer,
}

#[derive(Default)]
struct PipeState {
    open: Option<Open>,
    attempt: Option<(u64, CancellationToken)>,
}

struct Shared {
    config: PipeConfig,
    state: Mutex<PipeState>,
    next_epoch: AtomicU64,
    events: mpsc::UnboundedSender<PipeEvent>,
}

/// Client side of the duplex pipe to the engine.
///
/// Owns at most one connection. Cloning yields another handle to the same
/// connection, so the receive task, the control loop and senders can share
/// it.
#[derive(Clone)]
pub struct PipeTransport {
    shared: Arc<Shared>,
}

impl PipeTransport {
    pub fn new(config: PipeConfig) -> (Self, mpsc::UnboundedReceiver<PipeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(PipeState::default()),
            next_epoch: AtomicU64::new(1),
            events,
        });
        (Self { shared }, rx)
    }

    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }

    pub fn is_connected(&self) -> bool {
        self.lock().open.is_some()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.lock().open.as_ref().map(|open| open.id)
    }

    /// Open the engine's endpoint, retrying until it appears or `timeout`
    /// passes.
    ///
    /// A concurrent [`disconnect`](Self::disconnect) cancels the attempt.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<ConnectionId, ConnectError> {
        let epoch = self.shared.next_epoch.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut state = self.lock();
            if state.open.is_some() {
                return Err(ConnectError::AlreadyConnected);
            }
            if let Some((_, previous)) = state.attempt.replace((epoch, cancel.clone())) {
                previous.cancel();
            }
        }

        debug!(%endpoint, ?timeout, "connecting to engine pipe");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            stream = connect_with_timeout(endpoint, timeout, self.shared.config.retry_interval) => {
                stream.map_err(ConnectError::from)
            }
        };

        let mut state = self.lock();
        if matches!(state.attempt, Some((current, _)) if current == epoch) {
            state.attempt = None;
        }
        let stream = result?;
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }
        if state.open.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        let id = ConnectionId(epoch);
        let (reader, writer) = tokio::io::split(stream);
        state.open = Some(Open {
            id,
            cancel,
            reader: Some(reader),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        });
        info!(%id, %endpoint, "engine pipe connected");
        Ok(id)
    }

    /// Spawn the background task that decodes engine output into `sink`.
    ///
    /// The task ends on cancellation, end of stream, a read error or an
    /// unrecoverable frame error, and always closes its own connection on
    /// the way out.
    pub fn start_receive_loop(&self, sink: Arc<dyn LogSink>) -> Result<JoinHandle<()>, LoopError> {
        let (id, cancel, reader) = {
            let mut state = self.lock();
            let open = state.open.as_mut().ok_or(LoopError::NotConnected)?;
            let reader = open.reader.take().ok_or(LoopError::AlreadyRunning)?;
            (open.id, open.cancel.clone(), reader)
        };
        let transport = self.clone();
        Ok(tokio::spawn(async move {
            transport.receive_loop(id, cancel, reader, sink).await;
        }))
    }

    async fn receive_loop(
        self,
        id: ConnectionId,
        cancel: CancellationToken,
        mut reader: ReadHalf<PipeStream>,
        sink: Arc<dyn LogSink>,
    ) {
        let mut buffer = ReceiveBuffer::new(self.shared.config.frame.clone());
        let mut chunk = vec![0u8; self.shared.config.read_chunk_size.max(1)];
        debug!(%id, "receive loop started");

        'read: loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = reader.read(&mut chunk) => read,
            };

            let n = match read {
                Ok(0) => {
                    debug!(%id, "engine closed the pipe");
                    break;
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    if !cancel.is_cancelled() {
                        warn!(%id, error = %err, "engine pipe read failed");
                        sink.on_editor_log(LogLevel::Error, &format!("Pipe read error: {err}"));
                    }
                    break;
                }
            };

            for result in buffer.push(&chunk[..n]) {
                if cancel.is_cancelled() {
                    break 'read;
                }
                match result {
                    Ok(Frame::Log { level, text }) => sink.on_engine_log(level, &text),
                    Err(err) if err.is_recoverable() => {
                        warn!(%id, error = %err, "dropping undecodable engine message");
                    }
                    Err(err) => {
                        error!(%id, error = %err, "engine pipe stream is unreadable");
                        break 'read;
                    }
                }
            }
        }

        drop(reader);
        debug!(%id, "receive loop finished");
        self.teardown(Some(id)).await;
    }

    /// Write raw bytes to the engine.
    ///
    /// On a write failure the connection is closed before the error is
    /// returned.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), SendError> {
        let (id, writer) = {
            let state = self.lock();
            let open = state.open.as_ref().ok_or(SendError::NotConnected)?;
            (open.id, Arc::clone(&open.writer))
        };

        let result = {
            let mut writer = writer.lock().await;
            match writer.write_all(bytes).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };

        if let Err(err) = result {
            warn!(%id, error = %err, "engine pipe write failed");
            self.teardown(Some(id)).await;
            return Err(SendError::Io(err));
        }
        Ok(())
    }

    /// Encode one log message with the configured framing and send it.
    pub async fn send_log(&self, level: LogLevel, text: &str) -> Result<(), SendError> {
        let mut buf = BytesMut::new();
        self.shared.config.frame.framing.encode_log(level, text, &mut buf)?;
        self.send(&buf).await
    }

    /// Close the connection and cancel any attempt in flight.
    ///
    /// Returns `true` if a connection was open. Calling it again is a no-op.
    pub async fn disconnect(&self) -> bool {
        self.teardown(None).await
    }

    /// Close the connection only if it is still `id`.
    pub async fn disconnect_connection(&self, id: ConnectionId) -> bool {
        self.teardown(Some(id)).await
    }

    async fn teardown(&self, only: Option<ConnectionId>) -> bool {
        let open = {
            let mut state = self.lock();
            if only.is_none() {
                if let Some((_, attempt)) = state.attempt.take() {
                    attempt.cancel();
                }
            }
            let matches = match (&state.open, only) {
                (Some(open), Some(id)) => open.id == id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return false;
            }
            state.open.take()
        };
        let Some(open) = open else {
            return false;
        };

        open.cancel.cancel();
        drop(open.reader);

        let writer = open.writer;
        let close = async move {
            let mut writer = writer.lock().await;
            writer.flush().await?;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.shared.config.close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(id = %open.id, error = %err, "engine pipe close failed"),
            Err(_) => debug!(id = %open.id, "engine pipe close timed out"),
        }

        info!(id = %open.id, "engine pipe disconnected");
        // The observer may already be gone during shutdown.
        let _ = self.shared.events.send(PipeEvent::Disconnected { id: open.id });
        true
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("connection", &self.connection_id())
            .field("framing", &self.shared.config.frame.framing)
            .finish()
    }
}
