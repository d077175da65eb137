use std::path::PathBuf;
use std::time::Duration;

use forgelink_frame::{FrameConfig, Framing};
use forgelink_transport::{Endpoint, TransportError, DEFAULT_RETRY_INTERVAL};

/// Channel name passed as `--pipe <channel>` to the engine.
pub const DEFAULT_CHANNEL: &str = "stakeforge";

/// How long the worker gets to open its endpoint once we start connecting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Pause between spawning the worker and the first connect attempt.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(1000);

/// How long `stop` waits for a killed worker to be reaped.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Size of a single pipe read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Pipe transport configuration.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Framing and decode options for received data.
    pub frame: FrameConfig,
    /// Bytes requested per read. Default: 4096.
    pub read_chunk_size: usize,
    /// Pause between connect attempts while the endpoint is absent.
    pub retry_interval: Duration,
    /// Bound on flushing and closing the writer during disconnect.
    pub close_timeout: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            close_timeout: Duration::from_millis(500),
        }
    }
}

/// Process supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Channel name handed to the worker on its command line.
    pub channel: String,
    /// Kill other processes with the worker's name before spawning.
    pub kill_stale: bool,
    /// Try to raise the worker's scheduling priority.
    pub elevate_priority: bool,
    /// Let the worker share this process's stdout/stderr.
    pub inherit_stdio: bool,
    /// Wait bound for a killed worker to be reaped.
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            kill_stale: true,
            elevate_priority: true,
            inherit_stdio: true,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Everything the engine connection needs to run a session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine executable; validated on every start.
    pub executable: PathBuf,
    /// Extra arguments after `--pipe <channel>`.
    pub args: Vec<String>,
    /// Delay between spawn and the first connect attempt. Default: 1000 ms.
    pub grace_delay: Duration,
    /// Bound on establishing the pipe. Default: 5000 ms.
    pub connect_timeout: Duration,
    pub pipe: PipeConfig,
    pub supervisor: SupervisorConfig,
}

impl EngineConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            grace_delay: DEFAULT_GRACE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pipe: PipeConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.supervisor.channel = channel.into();
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.pipe.frame.framing = framing;
        self
    }

    pub fn with_kill_stale(mut self, kill_stale: bool) -> Self {
        self.supervisor.kill_stale = kill_stale;
        self
    }

    pub fn with_inherit_stdio(mut self, inherit: bool) -> Self {
        self.supervisor.inherit_stdio = inherit;
        self
    }

    /// The endpoint the worker will create for the configured channel.
    pub fn endpoint(&self) -> Result<Endpoint, TransportError> {
        Endpoint::for_channel(&self.supervisor.channel)
    }

    /// File name of the executable, used to tag engine output.
    pub fn engine_name(&self) -> String {
        self.executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string())
    }
}
