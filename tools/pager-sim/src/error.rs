//! Error types for pager-sim using thiserror

use demand_pager::{PagingError, Pid};
use thiserror::Error;

/// Top-level error type for simulator runs
#[derive(Error, Debug)]
pub enum SimError {
    #[error("paging error: {0}")]
    Paging(#[from] PagingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pid {pid} read {found:#x} at {vaddr:#010x}, expected {expected:#x}")]
    Mismatch {
        pid: Pid,
        vaddr: u32,
        expected: u32,
        found: u32,
    },

    #[error("shared read returned {0:?}")]
    SharedMismatch(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
