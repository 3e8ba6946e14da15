//! Process inspection for the memory guard and best-effort kill.

use log::debug;
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

pub(crate) fn with_process<F, R>(pid: u32, f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    let mut sys = System::new_all();
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);

    sys.process(Pid::from_u32(pid)).map(f)
}

/// Current resident memory of `pid` in bytes, or `None` if the process is
/// gone.
pub(crate) fn process_memory_bytes(pid: u32) -> Option<u64> {
    with_process(pid, |p| p.memory())
}

/// Kill `pid` without waiting for graceful shutdown.
///
/// Best effort: returns `false` when the process has already exited or the
/// kill could not be delivered.
pub(crate) fn kill_process(pid: u32) -> bool {
    with_process(pid, |p| {
        let killed = p.kill();
        debug!("Sent kill to PID {pid}: success={killed}");
        killed
    })
    .unwrap_or_else(|| {
        debug!("Process {pid} not found");
        false
    })
}
