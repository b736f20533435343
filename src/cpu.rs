//! CPU pinning for the role threads.

use crate::error::InitError;

/// Pin the calling thread to `cpu`. No-op when pinning is disabled in
/// the configuration (tests, containers with restricted CPU sets).
#[cfg(target_os = "linux")]
pub(crate) fn pin_current(role: &'static str, cpu: usize, enabled: bool) -> Result<(), InitError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    if !enabled {
        return Ok(());
    }
    let mut set = CpuSet::new();
    set.set(cpu).map_err(|source| InitError::Pin { role, cpu, source })?;
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|source| InitError::Pin { role, cpu, source })?;
    log::debug!("{role} pinned to cpu {cpu}");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_current(role: &'static str, cpu: usize, enabled: bool) -> Result<(), InitError> {
    if enabled {
        log::warn!("cpu pinning unsupported on this platform; {role} left floating (wanted cpu {cpu})");
    }
    Ok(())
}
