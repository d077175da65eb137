use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Process, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Linux truncates a process's comm name to this many bytes.
#[cfg(target_os = "linux")]
const COMM_LEN: usize = 15;

/// A process that looks like a leftover engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    /// Whether a kill was delivered. Always `false` from [`find_stale`].
    pub killed: bool,
}

/// List running processes whose name or executable stem matches `path`'s
/// file stem, excluding this process.
///
/// Blocks while the process table is read.
pub fn find_stale(path: &Path) -> Vec<StaleProcess> {
    let Some(stem) = path.file_stem() else {
        return Vec::new();
    };
    let system = process_table();
    matching(&system, stem)
        .map(|process| describe(process, false))
        .collect()
}

/// Kill every process [`find_stale`] would report.
pub fn kill_stale(path: &Path) -> Vec<StaleProcess> {
    let Some(stem) = path.file_stem() else {
        return Vec::new();
    };
    let system = process_table();
    matching(&system, stem)
        .map(|process| {
            let killed = process.kill();
            let report = describe(process, killed);
            if killed {
                info!(pid = report.pid, name = %report.name, "killed stale engine process");
            } else {
                warn!(pid = report.pid, name = %report.name, "failed to kill stale engine process");
            }
            report
        })
        .collect()
}

fn process_table() -> System {
    let mut system = System::new();
    let count = system.refresh_processes(ProcessesToUpdate::All, true);
    debug!(count, "refreshed process table");
    system
}

fn matching<'a>(system: &'a System, stem: &'a OsStr) -> impl Iterator<Item = &'a Process> + 'a {
    let own = sysinfo::get_current_pid().ok();
    system
        .processes()
        .values()
        .filter(move |process| Some(process.pid()) != own)
        .filter(move |process| process_matches(process, stem))
}

fn process_matches(process: &Process, stem: &OsStr) -> bool {
    if name_matches(process.name(), stem) {
        return true;
    }
    process
        .exe()
        .and_then(Path::file_stem)
        .is_some_and(|exe_stem| exe_stem == stem)
}

fn name_matches(name: &OsStr, stem: &OsStr) -> bool {
    if name.is_empty() {
        return false;
    }
    if Path::new(name).file_stem() == Some(stem) {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        let name = name.as_encoded_bytes();
        let stem = stem.as_encoded_bytes();
        if name.len() == COMM_LEN && stem.len() > COMM_LEN && stem.starts_with(name) {
            return true;
        }
    }
    false
}

fn describe(process: &Process, killed: bool) -> StaleProcess {
    StaleProcess {
        pid: process.pid().as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        exe: process.exe().map(Path::to_path_buf),
        killed,
    }
}
