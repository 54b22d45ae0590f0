//! Error types for paging operations

use thiserror::Error;

use crate::types::{FrameIndex, Pid, StoreId};

/// Result type for paging operations
pub type Result<T> = core::result::Result<T, PagingError>;

/// Failure classes callers act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad argument; nothing was mutated
    InvalidArgument,
    /// No store, frame or table slot left
    ResourceExhausted,
    /// Access with no backing mapping; the process was terminated
    IllegalAccess,
    /// Backing-store transfer failed
    Io,
    /// The process was terminated while the operation ran
    ProcessKilled,
}

/// Errors reported by the backing device
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Offset outside the backing region
    #[error("offset {0:#x} outside the backing region")]
    OutOfRange(usize),

    /// The medium refused the transfer
    #[error("medium failure at offset {0:#x}")]
    Medium(usize),
}

/// Errors that can occur during paging operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    #[error("invalid process id {0}")]
    BadPid(Pid),

    #[error("backing store {0} out of range")]
    BadStore(usize),

    #[error("page {0} outside the backing store")]
    BadPage(usize),

    #[error("frame {0} out of range")]
    BadFrame(usize),

    #[error("page count {0} outside (0, 256]")]
    BadPageCount(usize),

    #[error("buffer of {0} bytes is not one page")]
    BadBuffer(usize),

    #[error("virtual page {0:#x} lies in the reserved low region")]
    LowRegion(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("backing store {0} is bound to another owner")]
    StoreInUse(StoreId),

    #[error("range starting at virtual page {0:#x} overlaps an existing mapping")]
    AlreadyMapped(u32),

    #[error("virtual page {0:#x} is not mapped")]
    NotMapped(u32),

    #[error("process {0} has no address space")]
    NoAddressSpace(Pid),

    #[error("process {0} already has an address space")]
    AddressSpaceExists(Pid),

    #[error("process {0} has no virtual heap")]
    NoHeap(Pid),

    #[error("allocation size {0} is not positive")]
    BadSize(u32),

    #[error("block {addr:#x}+{len} rejected by the heap free list")]
    BadFree { addr: u32, len: u32 },

    #[error("no free backing store")]
    NoFreeStore,

    #[error("no free or evictable frame")]
    NoFrame,

    #[error("shared mapping table full")]
    MappingTableFull,

    #[error("virtual heap exhausted for a {0}-byte request")]
    HeapExhausted(u32),

    #[error("illegal access by pid {pid} at {vaddr:#010x}")]
    IllegalAccess { pid: Pid, vaddr: u32 },

    #[error("write-back of frame {0} failed")]
    WriteBack(FrameIndex),

    #[error("backing device: {0}")]
    Io(#[from] DeviceError),

    #[error("address {0:#010x} is in the kernel region")]
    KernelRegion(u32),

    #[error("address {0:#010x} kept faulting")]
    FaultLoop(u32),

    #[error("process {0} was terminated")]
    ProcessKilled(Pid),
}

impl PagingError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PagingError::BadPid(_)
            | PagingError::BadStore(_)
            | PagingError::BadPage(_)
            | PagingError::BadFrame(_)
            | PagingError::BadPageCount(_)
            | PagingError::BadBuffer(_)
            | PagingError::LowRegion(_)
            | PagingError::InvalidConfig(_)
            | PagingError::StoreInUse(_)
            | PagingError::AlreadyMapped(_)
            | PagingError::NotMapped(_)
            | PagingError::NoAddressSpace(_)
            | PagingError::AddressSpaceExists(_)
            | PagingError::NoHeap(_)
            | PagingError::BadSize(_)
            | PagingError::BadFree { .. }
            | PagingError::KernelRegion(_) => ErrorKind::InvalidArgument,
            PagingError::NoFreeStore
            | PagingError::NoFrame
            | PagingError::MappingTableFull
            | PagingError::HeapExhausted(_) => ErrorKind::ResourceExhausted,
            PagingError::IllegalAccess { .. } => ErrorKind::IllegalAccess,
            PagingError::WriteBack(_) | PagingError::Io(_) => ErrorKind::Io,
            PagingError::FaultLoop(_) | PagingError::ProcessKilled(_) => ErrorKind::ProcessKilled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(PagingError::BadStore(9).kind(), ErrorKind::InvalidArgument);
        assert_eq!(PagingError::NoFrame.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(
            PagingError::IllegalAccess { pid: Pid(3), vaddr: 0 }.kind(),
            ErrorKind::IllegalAccess
        );
        let io: PagingError = DeviceError::Medium(0x800000).into();
        assert_eq!(io.kind(), ErrorKind::Io);
    }
}
