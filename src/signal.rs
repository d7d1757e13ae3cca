//! Signal delivery to managed processes and their process groups.
use std::io;

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use tracing::warn;

pub use nix::sys::signal::Signal;

fn target(pid: u32) -> io::Result<Pid> {
    // 0 and negative values address whole process groups, including our own.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal PID {pid}"),
        )),
    }
}

/// Whether `pid` still exists. A process we may not signal still counts as alive.
pub fn is_alive(pid: u32) -> bool {
    match target(pid) {
        Ok(pid) => !matches!(kill(pid, None), Err(Errno::ESRCH)),
        Err(_) => false,
    }
}

/// Sends `signal` to `pid`. Returns `Ok(false)` when the process no longer exists.
pub fn signal_pid(pid: u32, signal: Signal) -> io::Result<bool> {
    match kill(target(pid)?, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(io::Error::from(err)),
    }
}

/// Sends `signal` to the process group of `pid`, but only when `pid` leads that
/// group and the group is not our own.
///
/// A process that merely belongs to someone else's group is left alone, as are
/// missing groups. A permission error is logged and ignored so the caller can
/// fall back to signalling the process directly.
pub fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = target(pid)?;
    let child_pgid = unsafe { libc::getpgid(pid.as_raw()) };
    if child_pgid != pid.as_raw() {
        return Ok(());
    }
    kill_group(pid.as_raw() as u32, signal)
}

/// Sends `signal` to process group `pgid`, which may have outlived its leader.
///
/// Our own group is never signalled.
pub fn kill_group(pgid: u32, signal: Signal) -> io::Result<()> {
    let pgid = target(pgid)?.as_raw();
    let supervisor_pgid = unsafe { libc::getpgid(0) };
    if pgid == supervisor_pgid {
        return Ok(());
    }

    if unsafe { libc::killpg(pgid, signal as libc::c_int) } < 0 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::ESRCH => {}
            Some(code) if code == libc::EPERM => {
                warn!(
                    "Insufficient permissions to signal process group {pgid}; falling back to direct signal"
                );
            }
            _ => return Err(err),
        }
    }
    Ok(())
}
