//! Kern subsystem - collaborators of the pager
//!
//! The scheduler interface the paging core calls back into, and the
//! interrupt-suppression primitive that makes each paging operation atomic.

pub mod sched;
pub mod spl;

pub use sched::{ProcState, ProcTable, Scheduler};
pub use spl::{disable, interrupts_disabled, SplGuard};
