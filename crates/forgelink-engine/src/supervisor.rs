use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::StartError;
use crate::priority::raise_priority;
use crate::stale::kill_stale;

/// A launched worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub pid: u32,
    pub executable: PathBuf,
    /// Increases with every launch; tags this worker's exit notice.
    pub generation: u64,
    #[serde(skip)]
    pub started_at: SystemTime,
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub generation: u64,
    pub pid: u32,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// `true` if the supervisor asked for the kill.
    pub requested: bool,
    pub description: String,
}

impl ProcessExit {
    fn new(generation: u64, pid: u32, status: std::io::Result<ExitStatus>, requested: bool) -> Self {
        let (code, description) = match status {
            Ok(status) => (status.code(), status.to_string()),
            Err(err) => (None, format!("wait failed: {err}")),
        };
        Self {
            generation,
            pid,
            code,
            requested,
            description,
        }
    }
}

/// Notices posted by the supervisor's exit observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Exited(ProcessExit),
}

/// Outcome of [`ProcessSupervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub pid: Option<u32>,
    /// A live worker existed when stop was called.
    pub was_running: bool,
    /// The worker was confirmed gone within the stop timeout.
    pub terminated: bool,
}

struct WorkerHandle {
    info: WorkerInfo,
    exited: Arc<AtomicBool>,
    kill: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<()>,
}

impl WorkerHandle {
    fn is_live(&self) -> bool {
        !self.exited.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct Launch {
    path: PathBuf,
    args: Vec<String>,
}

/// Owns the engine worker process.
///
/// At most one worker is live at a time. Each launch gets an exit observer
/// task that owns the [`Child`] and posts a [`SupervisorEvent::Exited`] when
/// the process ends, however it ends. Dropping the supervisor kills the
/// worker.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    handle: Option<WorkerHandle>,
    last_launch: Option<Launch>,
    next_generation: u64,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            config,
            handle: None,
            last_launch: None,
            next_generation: 1,
            events,
        };
        (supervisor, rx)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch `<path> --pipe <channel> <args...>` from the executable's folder.
    ///
    /// Other processes with the same name are killed first when
    /// `kill_stale` is set.
    pub async fn start(&mut self, path: &Path, args: &[String]) -> Result<WorkerInfo, StartError> {
        let executable = resolve_executable(path)?;

        if let Some(handle) = &self.handle {
            if handle.is_live() {
                return Err(StartError::AlreadyRunning {
                    pid: handle.info.pid,
                });
            }
        }
        self.handle = None;
        self.last_launch = Some(Launch {
            path: executable.clone(),
            args: args.to_vec(),
        });

        if self.config.kill_stale {
            let target = executable.clone();
            match tokio::task::spawn_blocking(move || kill_stale(&target)).await {
                Ok(killed) if !killed.is_empty() => {
                    info!(count = killed.len(), "cleared stale engine instances");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "stale engine scan failed"),
            }
        }

        let mut command = Command::new(&executable);
        command
            .arg("--pipe")
            .arg(&self.config.channel)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }
        if !self.config.inherit_stdio {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|source| StartError::SpawnFailed {
            path: executable.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        if self.config.elevate_priority {
            if let Err(err) = raise_priority(pid) {
                warn!(pid, error = %err, "could not raise engine priority");
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));
        tokio::spawn(observe(
            child,
            generation,
            pid,
            kill_rx,
            done_tx,
            Arc::clone(&exited),
            self.events.clone(),
        ));

        let info = WorkerInfo {
            pid,
            executable,
            generation,
            started_at: SystemTime::now(),
        };
        info!(pid, generation, executable = ?info.executable, "engine process started");
        self.handle = Some(WorkerHandle {
            info: info.clone(),
            exited,
            kill: Some(kill_tx),
            done: done_rx,
        });
        Ok(info)
    }

    /// Kill the worker, if any, and wait for it to be reaped.
    pub async fn stop(&mut self) -> StopReport {
        let Some(mut handle) = self.handle.take() else {
            return StopReport {
                pid: None,
                was_running: false,
                terminated: false,
            };
        };
        let pid = handle.info.pid;
        if !handle.is_live() {
            return StopReport {
                pid: Some(pid),
                was_running: false,
                terminated: false,
            };
        }

        if let Some(kill) = handle.kill.take() {
            let _ = kill.send(());
        }
        let terminated = match tokio::time::timeout(self.config.stop_timeout, handle.done).await {
            Ok(_) => true,
            Err(_) => {
                warn!(pid, timeout = ?self.config.stop_timeout, "engine process did not exit in time");
                false
            }
        };
        debug!(pid, terminated, "engine process stopped");
        StopReport {
            pid: Some(pid),
            was_running: true,
            terminated,
        }
    }

    /// Stop, then start again with the last launch's path and arguments.
    pub async fn restart(&mut self) -> Result<WorkerInfo, StartError> {
        let Some(launch) = self.last_launch.clone() else {
            return Err(StartError::PathInvalid {
                path: PathBuf::new(),
            });
        };
        self.stop().await;
        self.start(&launch.path, &launch.args).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(WorkerHandle::is_live)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle
            .as_ref()
            .filter(|handle| handle.is_live())
            .map(|handle| handle.info.pid)
    }

    /// The current worker, live or exited but not yet cleared.
    pub fn worker(&self) -> Option<&WorkerInfo> {
        self.handle.as_ref().map(|handle| &handle.info)
    }

    /// Forget the handle for `generation` after its exit was observed.
    pub fn clear_exited(&mut self, generation: u64) {
        if self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.info.generation == generation)
        {
            self.handle = None;
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("channel", &self.config.channel)
            .field("worker", &self.worker())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Canonical path of a launchable worker executable.
pub(crate) fn resolve_executable(path: &Path) -> Result<PathBuf, StartError> {
    let invalid = || StartError::PathInvalid {
        path: path.to_path_buf(),
    };
    if path.as_os_str().is_empty() || !path.is_file() {
        return Err(invalid());
    }
    std::fs::canonicalize(path).map_err(|_| invalid())
}

async fn observe(
    mut child: Child,
    generation: u64,
    pid: u32,
    kill: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
    exited: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) {
    // A dropped kill sender means the supervisor is gone; treat it as a kill.
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };
    let (status, requested) = match waited {
        Some(status) => (status, false),
        None => {
            if let Err(err) = child.start_kill() {
                debug!(pid, error = %err, "kill signal not delivered");
            }
            (child.wait().await, true)
        }
    };
    exited.store(true, Ordering::Release);

    let exit = ProcessExit::new(generation, pid, status, requested);
    if requested {
        info!(pid, generation, status = %exit.description, "engine process terminated");
    } else {
        warn!(pid, generation, status = %exit.description, "engine process exited");
    }
    let _ = events.send(SupervisorEvent::Exited(exit));
    let _ = done.send(());
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{unique_dir, write_script, SLEEPER};

    const WAIT: Duration = Duration::from_secs(5);

    fn quiet_config() -> SupervisorConfig {
        SupervisorConfig {
            inherit_stdio: false,
            ..SupervisorConfig::default()
        }
    }

    fn script(tag: &str, body: &str) -> (PathBuf, PathBuf) {
        let dir = unique_dir(tag);
        let path = write_script(&dir, &format!("sfw{tag}-{}", std::process::id()), body);
        (dir, path)
    }

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> ProcessExit {
        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for exit")
            .expect("event channel closed");
        let SupervisorEvent::Exited(exit) = event;
        exit
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected() {
        let (mut supervisor, _events) = ProcessSupervisor::new(quiet_config());
        let dir = unique_dir("inv");

        for path in [PathBuf::new(), dir.join("missing.exe"), dir.clone()] {
            let err = supervisor.start(&path, &[]).await.unwrap_err();
            assert!(matches!(err, StartError::PathInvalid { .. }), "{path:?}");
        }
        assert!(!supervisor.is_running());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn second_start_while_alive_is_rejected() {
        let (dir, path) = script("a", SLEEPER);
        let (mut supervisor, mut events) = ProcessSupervisor::new(quiet_config());

        let info = supervisor.start(&path, &[]).await.unwrap();
        assert!(supervisor.is_running());
        assert_eq!(supervisor.pid(), Some(info.pid));

        let err = supervisor.start(&path, &[]).await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning { pid } if pid == info.pid));

        let report = supervisor.stop().await;
        assert_eq!(report.pid, Some(info.pid));
        assert!(report.was_running);
        assert!(report.terminated);

        let exit = next_exit(&mut events).await;
        assert_eq!(exit.generation, info.generation);
        assert!(exit.requested);
        assert!(events.try_recv().is_err(), "only one process was spawned");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn natural_exit_is_reported() {
        let (dir, path) = script("n", "exit 3");
        let (mut supervisor, mut events) = ProcessSupervisor::new(quiet_config());

        let info = supervisor.start(&path, &[]).await.unwrap();
        let exit = next_exit(&mut events).await;
        assert_eq!(exit.generation, info.generation);
        assert_eq!(exit.pid, info.pid);
        assert_eq!(exit.code, Some(3));
        assert!(!exit.requested);
        assert!(!supervisor.is_running());

        let report = supervisor.stop().await;
        assert!(!report.was_running);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn spawns_with_pipe_flag_from_executable_folder() {
        let body = r#"cd_out="$(pwd)"
echo "$@" > args.txt
echo "$cd_out" > cwd.txt"#;
        let (dir, path) = script("c", body);
        let (mut supervisor, mut events) = ProcessSupervisor::new(quiet_config());

        let args = vec!["--headless".to_string()];
        supervisor.start(&path, &args).await.unwrap();
        let exit = next_exit(&mut events).await;
        assert_eq!(exit.code, Some(0));

        let written = std::fs::read_to_string(dir.join("args.txt")).unwrap();
        assert_eq!(written.trim(), "--pipe stakeforge --headless");
        let cwd = std::fs::read_to_string(dir.join("cwd.txt")).unwrap();
        assert_eq!(
            std::fs::canonicalize(cwd.trim()).unwrap(),
            std::fs::canonicalize(&dir).unwrap()
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn restart_requires_previous_launch() {
        let (mut supervisor, _events) = ProcessSupervisor::new(quiet_config());
        let err = supervisor.restart().await.unwrap_err();
        assert!(matches!(err, StartError::PathInvalid { .. }));
    }

    #[tokio::test]
    async fn restart_launches_new_generation() {
        let (dir, path) = script("r", SLEEPER);
        let (mut supervisor, mut events) = ProcessSupervisor::new(quiet_config());

        let first = supervisor.start(&path, &[]).await.unwrap();
        let second = supervisor.restart().await.unwrap();
        assert!(second.generation > first.generation);
        assert_ne!(second.pid, first.pid);

        let exit = next_exit(&mut events).await;
        assert_eq!(exit.generation, first.generation);
        assert!(supervisor.is_running());

        supervisor.stop().await;
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut supervisor, _events) = ProcessSupervisor::new(quiet_config());
        let first = supervisor.stop().await;
        let second = supervisor.stop().await;
        assert_eq!(first, second);
        assert!(!first.was_running);
    }

    #[tokio::test]
    async fn stale_instance_is_killed_before_spawn() {
        let (dir, path) = script("s", SLEEPER);
        let mut stale = std::process::Command::new(&path).spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (mut supervisor, _events) = ProcessSupervisor::new(quiet_config());
        let info = supervisor.start(&path, &[]).await.unwrap();
        assert_ne!(info.pid, stale.id());

        let status = tokio::task::spawn_blocking(move || stale.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(supervisor.is_running());

        supervisor.stop().await;
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn dropping_supervisor_kills_worker() {
        let (dir, path) = script("d", SLEEPER);
        let (mut supervisor, mut events) = ProcessSupervisor::new(quiet_config());
        supervisor.start(&path, &[]).await.unwrap();

        drop(supervisor);
        let exit = next_exit(&mut events).await;
        assert!(exit.requested);
        let _ = std::fs::remove_dir_all(dir);
    }
}
