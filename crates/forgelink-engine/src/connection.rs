use std::path::PathBuf;
use std::sync::Arc;

use forgelink_frame::LogLevel;
use forgelink_transport::Endpoint;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ConnectError, EngineError, Result, SendError, StartError};
use crate::pipe::{ConnectionId, PipeEvent, PipeTransport};
use crate::sink::LogSink;
use crate::status::{ConnectionStatus, StatusPublisher, StatusSubscription};
use crate::supervisor::{
    resolve_executable, ProcessExit, ProcessSupervisor, StopReport, SupervisorEvent, WorkerInfo,
};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum Command {
    Start {
        wait_for_pipe: bool,
        reply: oneshot::Sender<Result<WorkerInfo>>,
    },
    Stop {
        reply: oneshot::Sender<StopReport>,
    },
    Restart {
        reply: oneshot::Sender<Result<WorkerInfo>>,
    },
    SetExecutable {
        path: PathBuf,
        args: Option<Vec<String>>,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<StopReport>,
    },
}

type ConnectOutcome = (u64, std::result::Result<ConnectionId, ConnectError>);

struct PendingStart {
    generation: u64,
    info: WorkerInfo,
    reply: oneshot::Sender<Result<WorkerInfo>>,
}

/// Control loop for one engine session at a time.
///
/// The loop is the only writer of [`ConnectionStatus`]. Commands from
/// [`EngineHandle`], process exits from the supervisor, pipe disconnects and
/// connect outcomes all arrive as messages and are handled one at a time.
pub struct EngineConnection {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
    publisher: Arc<StatusPublisher>,
    supervisor: ProcessSupervisor,
    supervisor_events: mpsc::UnboundedReceiver<SupervisorEvent>,
    transport: PipeTransport,
    pipe_events: mpsc::UnboundedReceiver<PipeEvent>,
    attempts_tx: mpsc::UnboundedSender<ConnectOutcome>,
    attempts_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    /// Generation of the worker this session belongs to.
    generation: Option<u64>,
    endpoint: Option<Endpoint>,
    connection: Option<ConnectionId>,
    connect_task: Option<JoinHandle<()>>,
    receive_task: Option<JoinHandle<()>>,
    pending_start: Option<PendingStart>,
}

impl EngineConnection {
    /// Start the control loop on the current tokio runtime.
    ///
    /// The loop stops the worker and exits once [`EngineHandle::shutdown`] is
    /// called or every handle has been dropped.
    pub fn spawn(config: EngineConfig, sink: impl LogSink) -> EngineHandle {
        Self::spawn_shared(config, Arc::new(sink))
    }

    pub fn spawn_shared(config: EngineConfig, sink: Arc<dyn LogSink>) -> EngineHandle {
        let (supervisor, supervisor_events) = ProcessSupervisor::new(config.supervisor.clone());
        let (transport, pipe_events) = PipeTransport::new(config.pipe.clone());
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let publisher = Arc::new(StatusPublisher::default());

        let connection = Self {
            config,
            sink: Arc::clone(&sink),
            publisher: Arc::clone(&publisher),
            supervisor,
            supervisor_events,
            transport: transport.clone(),
            pipe_events,
            attempts_tx,
            attempts_rx,
            generation: None,
            endpoint: None,
            connection: None,
            connect_task: None,
            receive_task: None,
            pending_start: None,
        };
        tokio::spawn(connection.run(commands_rx));

        EngineHandle {
            commands,
            publisher,
            transport,
            sink,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("engine control loop started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = self.supervisor_events.recv() => self.on_supervisor_event(event).await,
                Some(event) = self.pipe_events.recv() => self.on_pipe_event(event),
                Some((generation, outcome)) = self.attempts_rx.recv() => {
                    self.on_connect_outcome(generation, outcome).await;
                }
            }
        }
        debug!("engine control loop stopped");
    }

    /// Returns `false` once the loop should end.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start {
                wait_for_pipe,
                reply,
            } => {
                let status = self.publisher.current();
                if status != ConnectionStatus::Disconnected {
                    let err = match self.supervisor.pid() {
                        Some(pid) => {
                            self.sink.on_editor_log(LogLevel::Error, "Server already running.");
                            EngineError::Start(StartError::AlreadyRunning { pid })
                        }
                        None => EngineError::InvalidState {
                            action: "start",
                            status,
                        },
                    };
                    let _ = reply.send(Err(err));
                    return true;
                }
                self.start(wait_for_pipe, reply).await;
            }
            Command::Stop { reply } => {
                let report = self.stop().await;
                let _ = reply.send(report);
            }
            Command::Restart { reply } => {
                self.stop().await;
                self.start(false, reply).await;
            }
            Command::SetExecutable { path, args, reply } => {
                debug!(?path, "engine executable updated");
                self.config.executable = path;
                if let Some(args) = args {
                    self.config.args = args;
                }
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                let report = self.stop().await;
                let _ = reply.send(report);
                return false;
            }
        }
        true
    }

    async fn start(&mut self, wait_for_pipe: bool, reply: oneshot::Sender<Result<WorkerInfo>>) {
        match self.launch().await {
            Ok(info) if wait_for_pipe => {
                self.pending_start = Some(PendingStart {
                    generation: info.generation,
                    info,
                    reply,
                });
            }
            result => {
                let _ = reply.send(result);
            }
        }
    }

    async fn launch(&mut self) -> Result<WorkerInfo> {
        let endpoint = match self.config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.sink
                    .on_editor_log(LogLevel::Error, &format!("Invalid engine channel: {err}"));
                return Err(ConnectError::Io(err).into());
            }
        };

        let started = match resolve_executable(&self.config.executable) {
            Ok(executable) => {
                self.sink.on_editor_log(LogLevel::Warn, "Starting server.");
                self.supervisor.start(&executable, &self.config.args).await
            }
            Err(err) => Err(err),
        };
        let info = match started {
            Ok(info) => info,
            Err(err) => {
                let message = match &err {
                    StartError::PathInvalid { path } => format!(
                        "Failed launching engine server, server path doesn't exist: {}",
                        path.display()
                    ),
                    StartError::AlreadyRunning { .. } => "Server already running.".to_string(),
                    StartError::SpawnFailed { .. } => format!("Failed to start engine process: {err}"),
                };
                self.sink.on_editor_log(LogLevel::Error, &message);
                return Err(err.into());
            }
        };

        self.generation = Some(info.generation);
        self.publisher.publish(ConnectionStatus::ProcessRunningNoPipe);
        self.schedule_connect(info.generation, endpoint.clone());
        self.endpoint = Some(endpoint);
        Ok(info)
    }

    fn schedule_connect(&mut self, generation: u64, endpoint: Endpoint) {
        let transport = self.transport.clone();
        let grace_delay = self.config.grace_delay;
        let timeout = self.config.connect_timeout;
        let outcomes = self.attempts_tx.clone();
        self.abort_connect();
        self.connect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(grace_delay).await;
            let outcome = transport.connect(&endpoint, timeout).await;
            let _ = outcomes.send((generation, outcome));
        }));
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    async fn on_connect_outcome(
        &mut self,
        generation: u64,
        outcome: std::result::Result<ConnectionId, ConnectError>,
    ) {
        if self.generation != Some(generation) {
            if let Ok(id) = outcome {
                debug!(%id, generation, "discarding pipe connection for a stale worker");
                self.transport.disconnect_connection(id).await;
            }
            return;
        }
        self.connect_task = None;

        match outcome {
            Ok(id) => {
                self.connection = Some(id);
                self.publisher.publish(ConnectionStatus::Connected);
                let name = self
                    .endpoint
                    .as_ref()
                    .map(|endpoint| endpoint.name().to_string())
                    .unwrap_or_default();
                self.sink.on_editor_log(
                    LogLevel::Info,
                    &format!("Connected to engine via named pipe '{name}'."),
                );
                match self.transport.start_receive_loop(Arc::clone(&self.sink)) {
                    Ok(task) => self.receive_task = Some(task),
                    Err(err) => warn!(%id, error = %err, "receive loop not started"),
                }
                if let Some(pending) = self.take_pending(generation) {
                    let _ = pending.reply.send(Ok(pending.info));
                }
            }
            Err(err) => {
                warn!(generation, error = %err, "engine pipe connect failed");
                let message = match &err {
                    ConnectError::Timeout(_) => "Failed to connect to engine pipe: Timeout.".to_string(),
                    other => format!("Failed to connect to engine pipe: {other}"),
                };
                self.sink.on_editor_log(LogLevel::Error, &message);
                if let Some(pending) = self.take_pending(generation) {
                    let _ = pending.reply.send(Err(err.into()));
                }
            }
        }
    }

    fn on_pipe_event(&mut self, event: PipeEvent) {
        let PipeEvent::Disconnected { id } = event;
        if self.connection != Some(id) {
            debug!(%id, "ignoring disconnect of a previous connection");
            return;
        }
        self.connection = None;
        self.receive_task = None;
        if self.publisher.current() == ConnectionStatus::Connected {
            self.sink
                .on_editor_log(LogLevel::Warn, "Engine pipe disconnected.");
            self.publisher.publish(ConnectionStatus::ProcessRunningNoPipe);
        }
    }

    async fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        let SupervisorEvent::Exited(exit) = event;
        if self.generation != Some(exit.generation) {
            debug!(generation = exit.generation, "ignoring exit of a previous worker");
            return;
        }
        self.supervisor.clear_exited(exit.generation);
        if let Some(task) = self.receive_task.as_mut() {
            // Let the loop read whatever the worker wrote before exiting.
            if tokio::time::timeout(self.config.pipe.close_timeout, task)
                .await
                .is_ok()
            {
                self.receive_task = None;
            }
        }
        self.end_session().await;

        if !exit.requested {
            error!(pid = exit.pid, status = %exit.description, "engine process exited unexpectedly");
            self.sink.on_editor_log(LogLevel::Warn, "Engine process exited!");
        }
        self.fail_pending(&exit);
        self.publisher.publish(ConnectionStatus::Disconnected);
    }

    async fn stop(&mut self) -> StopReport {
        self.end_session().await;
        if let Some(pending) = self.pending_start.take() {
            let _ = pending.reply.send(Err(ConnectError::Cancelled.into()));
        }
        let report = self.supervisor.stop().await;
        self.sink.on_editor_log(LogLevel::Info, "Engine process killed!");
        self.publisher.publish(ConnectionStatus::Disconnected);
        report
    }

    /// Forget the current worker and close its pipe.
    async fn end_session(&mut self) {
        self.generation = None;
        self.connection = None;
        self.abort_connect();
        self.transport.disconnect().await;
        if let Some(task) = self.receive_task.take() {
            if tokio::time::timeout(self.config.pipe.close_timeout, task)
                .await
                .is_err()
            {
                debug!("receive loop did not finish in time");
            }
        }
    }

    fn take_pending(&mut self, generation: u64) -> Option<PendingStart> {
        if self
            .pending_start
            .as_ref()
            .is_some_and(|pending| pending.generation == generation)
        {
            return self.pending_start.take();
        }
        None
    }

    fn fail_pending(&mut self, exit: &ProcessExit) {
        if let Some(pending) = self.take_pending(exit.generation) {
            let _ = pending
                .reply
                .send(Err(EngineError::ProcessExited(exit.description.clone())));
        }
    }
}

/// Cloneable handle to a running [`EngineConnection`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    publisher: Arc<StatusPublisher>,
    transport: PipeTransport,
    sink: Arc<dyn LogSink>,
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Launch the worker. Resolves once the process is spawned; the pipe is
    /// connected in the background.
    pub async fn start(&self) -> Result<WorkerInfo> {
        self.request(|reply| Command::Start {
            wait_for_pipe: false,
            reply,
        })
        .await?
    }

    /// Launch the worker and resolve once the pipe is connected, the connect
    /// attempt fails, or the worker exits.
    pub async fn start_and_wait_connected(&self) -> Result<WorkerInfo> {
        self.request(|reply| Command::Start {
            wait_for_pipe: true,
            reply,
        })
        .await?
    }

    /// Close the pipe and terminate the worker. Valid in any state.
    pub async fn stop(&self) -> Result<StopReport> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Stop, then start with the configured executable and arguments.
    pub async fn restart(&self) -> Result<WorkerInfo> {
        self.request(|reply| Command::Restart { reply }).await?
    }

    /// Change the executable (and optionally its arguments) for the next
    /// start. A running worker is left alone.
    pub async fn set_executable(
        &self,
        path: impl Into<PathBuf>,
        args: Option<Vec<String>>,
    ) -> Result<()> {
        let path = path.into();
        self.request(|reply| Command::SetExecutable { path, args, reply })
            .await
    }

    /// Write raw bytes to the engine.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.transport
            .send(bytes)
            .await
            .map_err(|err| self.report_send_error(err))
    }

    /// Send one log-kind message using the configured framing.
    pub async fn send_log(&self, level: LogLevel, text: &str) -> Result<()> {
        self.transport
            .send_log(level, text)
            .await
            .map_err(|err| self.report_send_error(err))
    }

    fn report_send_error(&self, err: SendError) -> EngineError {
        let message = match &err {
            SendError::NotConnected => "Cannot send message: Pipe is not connected.".to_string(),
            other => format!("An unexpected error occurred while sending message: {other}"),
        };
        self.sink.on_editor_log(LogLevel::Error, &message);
        err.into()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.publisher.current()
    }

    /// Every status change from now on, in order.
    pub fn subscribe(&self) -> StatusSubscription {
        self.publisher.subscribe()
    }

    /// Latest-value view of the status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.publisher.watch()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Stop the worker and end the control loop.
    pub async fn shutdown(&self) -> Result<StopReport> {
        let report = self.request(|reply| Command::Shutdown { reply }).await?;
        info!("engine connection shut down");
        Ok(report)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use forgelink_transport::PipeListener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::sink::{channel_sink, LogEvent, LogOrigin};
    use crate::test_support::{unique_dir, write_script, SLEEPER};

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        dir: PathBuf,
        config: EngineConfig,
        endpoint: Endpoint,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            static NEXT: AtomicU32 = AtomicU32::new(0);
            let n = NEXT.fetch_add(1, Ordering::Relaxed);
            let dir = unique_dir(tag);
            let exe = write_script(&dir, &format!("sfc{tag}-{}", std::process::id()), SLEEPER);
            let channel = format!("flc-{}-{n}", std::process::id());
            let config = EngineConfig::new(exe)
                .with_channel(channel)
                .with_grace_delay(Duration::ZERO)
                .with_connect_timeout(Duration::from_secs(2))
                .with_inherit_stdio(false);
            let endpoint = config.endpoint().unwrap();
            Self {
                dir,
                config,
                endpoint,
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn wait_for(sub: &mut StatusSubscription, want: ConnectionStatus) {
        tokio::time::timeout(WAIT, async {
            while let Some(status) = sub.next().await {
                if status == want {
                    return;
                }
            }
            panic!("status stream ended before {want:?}");
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
    }

    async fn next_log(rx: &mut mpsc::UnboundedReceiver<LogEvent>, origin: LogOrigin) -> LogEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = rx.recv().await.expect("sink closed");
                if event.origin == origin {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for log")
    }

    fn kill(pid: u32) {
        // SAFETY: plain syscall on a pid we spawned.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }

    #[tokio::test]
    async fn missing_executable_stays_disconnected() {
        let fixture = Fixture::new("m");
        let config = EngineConfig::new(fixture.dir.join("nope.exe"));
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(config, sink);

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Start(StartError::PathInvalid { .. })));
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);

        let mut saw_error = false;
        while let Ok(event) = logs.try_recv() {
            assert_ne!(event.text, "Starting server.");
            saw_error |= event.level == LogLevel::Error
                && event.text.starts_with("Failed launching engine server");
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn second_start_reports_already_running() {
        let fixture = Fixture::new("a");
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);

        let info = engine.start().await.unwrap();
        let err = engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Start(StartError::AlreadyRunning { pid }) if pid == info.pid
        ));

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn connect_timeout_leaves_process_running() {
        let mut fixture = Fixture::new("t");
        fixture.config = fixture
            .config
            .clone()
            .with_connect_timeout(Duration::from_millis(200));
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);

        let err = engine.start_and_wait_connected().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Connect(ConnectError::Timeout(t)) if t == Duration::from_millis(200)
        ));
        assert_eq!(engine.status(), ConnectionStatus::ProcessRunningNoPipe);

        engine.shutdown().await.unwrap();
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn exit_after_connect_goes_disconnected() {
        let fixture = Fixture::new("x");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let mut status = engine.subscribe();

        let info = engine.start_and_wait_connected().await.unwrap();
        let _worker = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::ProcessRunningNoPipe).await;
        wait_for(&mut status, ConnectionStatus::Connected).await;

        kill(info.pid);
        wait_for(&mut status, ConnectionStatus::Disconnected).await;
        assert!(!engine.is_connected());

        let mut saw_exit = false;
        while let Ok(event) = logs.try_recv() {
            saw_exit |= event.text == "Engine process exited!";
        }
        assert!(saw_exit);
    }

    #[tokio::test]
    async fn engine_lines_reach_sink() {
        let fixture = Fixture::new("l");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);

        engine.start_and_wait_connected().await.unwrap();
        let mut worker = listener.accept().await.unwrap();

        worker.write_all(b"\x00\x01boot ok\n").await.unwrap();
        let line = next_log(&mut logs, LogOrigin::Engine).await;
        assert_eq!(line.level, LogLevel::Info);
        assert_eq!(line.text, "boot ok");
        assert_eq!(
            line.display(&fixture.config.engine_name()),
            format!("[{}] -> boot ok", fixture.config.engine_name())
        );

        engine.send_log(LogLevel::Trace, "ping").await.unwrap();
        let mut buf = [0u8; 6];
        worker.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x00\x00ping");

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_twice_is_safe() {
        let fixture = Fixture::new("s");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);

        engine.start_and_wait_connected().await.unwrap();
        let mut worker = listener.accept().await.unwrap();

        let first = engine.stop().await.unwrap();
        assert!(first.was_running);
        assert!(first.terminated);
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);

        let second = engine.stop().await.unwrap();
        assert!(!second.was_running);
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);

        let mut buf = [0u8; 1];
        assert_eq!(worker.read(&mut buf).await.unwrap(), 0);

        let mut killed = 0;
        while let Ok(event) = logs.try_recv() {
            if event.text == "Engine process killed!" {
                killed += 1;
            }
        }
        assert_eq!(killed, 2);
    }

    #[tokio::test]
    async fn send_without_pipe_is_not_connected() {
        let fixture = Fixture::new("n");
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);

        let err = engine.send(b"\x00\x01hi").await.unwrap_err();
        assert!(matches!(err, EngineError::Send(SendError::NotConnected)));
        let event = logs.try_recv().unwrap();
        assert_eq!(event.text, "Cannot send message: Pipe is not connected.");
    }

    #[tokio::test]
    async fn pipe_loss_falls_back_to_no_pipe() {
        let fixture = Fixture::new("p");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let mut status = engine.subscribe();

        engine.start_and_wait_connected().await.unwrap();
        let worker = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::Connected).await;

        drop(worker);
        wait_for(&mut status, ConnectionStatus::ProcessRunningNoPipe).await;
        assert_eq!(engine.status(), ConnectionStatus::ProcessRunningNoPipe);

        engine.shutdown().await.unwrap();
    }

    // Shutting down the worker's read side makes the editor's writes fail
    // while its reader still sees an open pipe.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn send_failure_falls_back_to_no_pipe() {
        use std::os::fd::AsRawFd;

        let fixture = Fixture::new("w");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let mut status = engine.subscribe();

        engine.start_and_wait_connected().await.unwrap();
        let worker = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::Connected).await;

        // SAFETY: the fd stays owned by `worker`, which outlives the call.
        let rc = unsafe { libc::shutdown(worker.as_raw_fd(), libc::SHUT_RD) };
        assert_eq!(rc, 0);

        let err = engine.send(b"\x00\x01ping").await.unwrap_err();
        assert!(matches!(err, EngineError::Send(SendError::Io(_))), "{err:?}");
        wait_for(&mut status, ConnectionStatus::ProcessRunningNoPipe).await;
        assert!(!engine.is_connected());
        assert_eq!(engine.status(), ConnectionStatus::ProcessRunningNoPipe);

        let mut saw_send_error = false;
        let mut saw_disconnect = false;
        while let Ok(event) = logs.try_recv() {
            saw_send_error |= event.level == LogLevel::Error
                && event
                    .text
                    .starts_with("An unexpected error occurred while sending message");
            saw_disconnect |= event.text == "Engine pipe disconnected.";
        }
        assert!(saw_send_error);
        assert!(saw_disconnect);

        assert!(engine.shutdown().await.unwrap().was_running);
        drop(worker);
    }

    #[tokio::test]
    async fn worker_exit_before_connect_fails_start() {
        let fixture = Fixture::new("q");
        let exe = write_script(&fixture.dir, &format!("sfq-{}", std::process::id()), "exit 3");
        let config = EngineConfig::new(exe)
            .with_channel(fixture.config.supervisor.channel.clone())
            .with_grace_delay(Duration::from_millis(500))
            .with_connect_timeout(Duration::from_secs(2))
            .with_inherit_stdio(false);
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(config, sink);

        let err = tokio::time::timeout(WAIT, engine.start_and_wait_connected())
            .await
            .expect("start should resolve once the worker exits")
            .unwrap_err();
        assert!(
            matches!(&err, EngineError::ProcessExited(description) if description.contains('3')),
            "{err:?}"
        );
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);

        let mut saw_exit = false;
        while let Ok(event) = logs.try_recv() {
            saw_exit |= event.text == "Engine process exited!";
        }
        assert!(saw_exit);
    }

    #[tokio::test]
    async fn last_line_before_exit_reaches_sink() {
        let fixture = Fixture::new("z");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, mut logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let mut status = engine.subscribe();

        let info = engine.start_and_wait_connected().await.unwrap();
        let mut worker = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::Connected).await;

        worker.write_all(b"\x00\x03fatal: out of memory\n").await.unwrap();
        drop(worker);
        kill(info.pid);
        wait_for(&mut status, ConnectionStatus::Disconnected).await;

        let mut texts = Vec::new();
        while let Ok(event) = logs.try_recv() {
            texts.push((event.origin, event.text));
        }
        let line = texts
            .iter()
            .position(|(origin, text)| *origin == LogOrigin::Engine && text == "fatal: out of memory")
            .expect("engine line should be delivered");
        let exited = texts
            .iter()
            .position(|(_, text)| text == "Engine process exited!")
            .expect("exit should be reported");
        assert!(line < exited, "{texts:?}");
    }

    #[tokio::test]
    async fn restart_ignores_exit_of_previous_worker() {
        let fixture = Fixture::new("r");
        let mut listener = PipeListener::bind(&fixture.endpoint).unwrap();
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let mut status = engine.subscribe();

        let first = engine.start_and_wait_connected().await.unwrap();
        let _old = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::Connected).await;

        let second = engine.restart().await.unwrap();
        assert!(second.generation > first.generation);
        let _new = listener.accept().await.unwrap();
        wait_for(&mut status, ConnectionStatus::Connected).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.status(), ConnectionStatus::Connected);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn set_executable_applies_to_next_start() {
        let fixture = Fixture::new("e");
        let config = EngineConfig::new(fixture.dir.join("missing.exe"))
            .with_channel(fixture.config.supervisor.channel.clone())
            .with_grace_delay(Duration::ZERO)
            .with_inherit_stdio(false);
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(config, sink);

        assert!(engine.start().await.is_err());
        engine
            .set_executable(fixture.config.executable.clone(), None)
            .await
            .unwrap();
        let info = engine.start().await.unwrap();
        assert_eq!(
            info.executable,
            std::fs::canonicalize(&fixture.config.executable).unwrap()
        );

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_last_handle_stops_worker() {
        let fixture = Fixture::new("d");
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        let info = engine.start().await.unwrap();
        drop(engine);

        let gone = tokio::time::timeout(WAIT, async {
            loop {
                // SAFETY: signal 0 only probes for existence.
                let alive = unsafe { libc::kill(info.pid as libc::pid_t, 0) } == 0;
                if !alive {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "worker still running after last handle dropped");
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let fixture = Fixture::new("c");
        let (sink, _logs) = channel_sink();
        let engine = EngineConnection::spawn(fixture.config.clone(), sink);
        engine.shutdown().await.unwrap();

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Closed));
    }
}
