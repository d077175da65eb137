//! Best-effort scheduling priority boost for the engine worker.

use std::io;

/// Nice value requested on unix. Needs `CAP_SYS_NICE` (or root) to succeed.
#[cfg(unix)]
pub const ELEVATED_NICE: libc::c_int = -5;

/// Raise the scheduling priority of process `pid`.
#[cfg(unix)]
pub fn raise_priority(pid: u32) -> io::Result<()> {
    // SAFETY: setpriority takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, ELEVATED_NICE) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Raise the priority class of process `pid` to `HIGH_PRIORITY_CLASS`.
#[cfg(windows)]
pub fn raise_priority(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, SetPriorityClass, HIGH_PRIORITY_CLASS, PROCESS_SET_INFORMATION,
    };

    // SAFETY: the handle is checked for null before use and closed exactly once.
    unsafe {
        let handle = OpenProcess(PROCESS_SET_INFORMATION, 0, pid);
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let ok = SetPriorityClass(handle, HIGH_PRIORITY_CLASS);
        let err = io::Error::last_os_error();
        CloseHandle(handle);
        if ok == 0 {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn raise_priority(_pid: u32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}
