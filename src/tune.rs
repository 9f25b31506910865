//! Host scheduling adjustments that reduce replay timing jitter.
//!
//! Every step is best effort: a failure is logged as a warning and the next step still runs.
//! Nothing here is ever undone, and it should run exactly once, before any device work.

use std::fmt;
use std::io;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::sys::mman::{mlockall, MlockAllFlags};
use nix::unistd::Pid;
use thiserror::Error;

pub const DEFAULT_CPU: usize = 3;
pub const DEFAULT_PRIORITY: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneConfig {
    /// Core the process is pinned to.
    pub cpu: usize,
    /// SCHED_FIFO priority, 1 to 99.
    pub priority: i32,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU,
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// What ended up applied. Anything left unset means default scheduling for that aspect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulingState {
    pub pinned_cpu: Option<usize>,
    pub fifo_priority: Option<i32>,
    pub memory_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneStep {
    PinCpu,
    RealtimePriority,
    LockMemory,
}

impl fmt::Display for TuneStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TuneStep::PinCpu => "sched_setaffinity",
            TuneStep::RealtimePriority => "sched_setscheduler",
            TuneStep::LockMemory => "mlockall",
        })
    }
}

/// A tuning step that could not be applied. Logged, never propagated.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct TuningWarning {
    pub step: TuneStep,
    #[source]
    pub source: io::Error,
}

/// The process-wide knobs the tuner turns.
pub trait HostScheduler {
    fn pin_to_cpu(&mut self, cpu: usize) -> io::Result<()>;
    fn set_fifo_priority(&mut self, priority: i32) -> io::Result<()>;
    fn lock_memory(&mut self) -> io::Result<()>;
}

/// The calling process on Linux.
#[derive(Debug, Default)]
pub struct LinuxScheduler;

impl HostScheduler for LinuxScheduler {
    fn pin_to_cpu(&mut self, cpu: usize) -> io::Result<()> {
        let mut set = CpuSet::new();
        set.set(cpu)?;
        sched_setaffinity(Pid::from_raw(0), &set)?;
        Ok(())
    }

    fn set_fifo_priority(&mut self, priority: i32) -> io::Result<()> {
        // nix has no wrapper for sched_setscheduler.
        let param = libc::sched_param {
            sched_priority: priority,
        };
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn lock_memory(&mut self) -> io::Result<()> {
        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)?;
        Ok(())
    }
}

/// Applies all tuning steps to the current process.
pub fn tune(config: &TuneConfig) -> SchedulingState {
    tune_with(&mut LinuxScheduler, config)
}

pub fn tune_with<H: HostScheduler>(host: &mut H, config: &TuneConfig) -> SchedulingState {
    let mut state = SchedulingState::default();

    match host.pin_to_cpu(config.cpu) {
        Ok(()) => {
            log::info!("CPU pinned to core {}", config.cpu);
            state.pinned_cpu = Some(config.cpu);
        }
        Err(source) => warn(TuneStep::PinCpu, source),
    }

    match host.set_fifo_priority(config.priority) {
        Ok(()) => {
            log::info!("real-time scheduler enabled (SCHED_FIFO, priority {})", config.priority);
            state.fifo_priority = Some(config.priority);
        }
        Err(source) => {
            if source.kind() == io::ErrorKind::PermissionDenied {
                log::warn!("real-time scheduling needs root or CAP_SYS_NICE");
            }
            warn(TuneStep::RealtimePriority, source)
        }
    }

    match host.lock_memory() {
        Ok(()) => {
            log::info!("memory locked (no paging)");
            state.memory_locked = true;
        }
        Err(source) => warn(TuneStep::LockMemory, source),
    }

    state
}

fn warn(step: TuneStep, source: io::Error) {
    log::warn!("{}", TuningWarning { step, source });
}
