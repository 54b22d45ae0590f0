//! Scheduler interface
//!
//! The pager never schedules anything itself. It asks which process is
//! running, whether a process is alive, and retires a process after its
//! address space has been torn down. `ProcTable` is the hosted
//! implementation: a fixed process table with an explicit current slot.

use alloc::vec::Vec;

use crate::error::{PagingError, Result};
use crate::paging::vm_param::NPROC;
use crate::types::Pid;

/// What the pager needs from the process manager
pub trait Scheduler {
    /// Process whose address space the MMU translates through
    fn current(&self) -> Pid;

    /// Whether `pid` names a live process
    fn is_live(&self, pid: Pid) -> bool;

    /// Retire `pid`
    ///
    /// Called only after the pager has released everything the process
    /// owned; the scheduler may switch away immediately.
    fn kill(&mut self, pid: Pid);
}

/// Process slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Slot unused
    Free,
    /// Runnable, not on the CPU
    Ready,
    /// On the CPU
    Current,
}

/// Fixed-size process table
#[derive(Debug)]
pub struct ProcTable {
    states: [ProcState; NPROC],
    current: Pid,
    killed: Vec<Pid>,
}

impl ProcTable {
    /// Table holding only the null process, which is running
    pub fn new() -> Self {
        let mut states = [ProcState::Free; NPROC];
        states[Pid::NULL.0] = ProcState::Current;
        Self {
            states,
            current: Pid::NULL,
            killed: Vec::new(),
        }
    }

    /// Claim the first free slot as a ready process
    pub fn spawn(&mut self) -> Result<Pid> {
        let slot = self
            .states
            .iter()
            .position(|s| *s == ProcState::Free)
            .ok_or(PagingError::BadPid(Pid(NPROC)))?;
        self.states[slot] = ProcState::Ready;
        Ok(Pid(slot))
    }

    /// Put `pid` on the CPU
    pub fn switch_to(&mut self, pid: Pid) -> Result<()> {
        if !self.is_live(pid) {
            return Err(PagingError::BadPid(pid));
        }
        if self.states[self.current.0] == ProcState::Current {
            self.states[self.current.0] = ProcState::Ready;
        }
        self.states[pid.0] = ProcState::Current;
        self.current = pid;
        Ok(())
    }

    /// State of a slot
    pub fn state(&self, pid: Pid) -> Option<ProcState> {
        self.states.get(pid.0).copied()
    }

    /// Processes retired so far, in order
    pub fn killed(&self) -> &[Pid] {
        &self.killed
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ProcTable {
    fn current(&self) -> Pid {
        self.current
    }

    fn is_live(&self, pid: Pid) -> bool {
        matches!(self.state(pid), Some(ProcState::Ready | ProcState::Current))
    }

    fn kill(&mut self, pid: Pid) {
        // The null process never dies
        if pid == Pid::NULL || !self.is_live(pid) {
            return;
        }
        self.states[pid.0] = ProcState::Free;
        self.killed.push(pid);
        if self.current == pid {
            self.current = Pid::NULL;
            self.states[Pid::NULL.0] = ProcState::Current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_switch() {
        let mut procs = ProcTable::new();
        let a = procs.spawn().unwrap();
        assert_eq!(a, Pid(1));
        procs.switch_to(a).unwrap();
        assert_eq!(procs.current(), a);
        assert_eq!(procs.state(Pid::NULL), Some(ProcState::Ready));
    }

    #[test]
    fn test_kill_current_falls_back_to_null() {
        let mut procs = ProcTable::new();
        let a = procs.spawn().unwrap();
        procs.switch_to(a).unwrap();
        procs.kill(a);
        assert!(!procs.is_live(a));
        assert_eq!(procs.current(), Pid::NULL);
        assert_eq!(procs.killed(), &[a]);
        procs.kill(a);
        assert_eq!(procs.killed().len(), 1);
    }

    #[test]
    fn test_switch_to_dead_fails() {
        let mut procs = ProcTable::new();
        assert!(procs.switch_to(Pid(7)).is_err());
    }
}
