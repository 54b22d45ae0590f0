//! Common types used across the pager
//!
//! This module defines shared identifier types to avoid circular dependencies.

use crate::paging::vm_param::{FRAME0, MAX_STORES, NPROC};

/// Process identifier (index into the process table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub usize);

impl Pid {
    /// The null (idle) process
    pub const NULL: Self = Self(0);

    /// Whether the id indexes a process-table slot
    pub const fn in_range(self) -> bool {
        self.0 < NPROC
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backing store identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StoreId(pub usize);

impl StoreId {
    /// Whether the id indexes a backing-store slot
    pub const fn in_range(self) -> bool {
        self.0 < MAX_STORES
    }
}

impl core::fmt::Display for StoreId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a frame in the managed pool
///
/// The physical frame number is always `FRAME0 + index`; entries in page
/// tables store the physical frame number, never a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameIndex(pub usize);

impl FrameIndex {
    /// Physical frame number of this frame
    pub const fn pfn(self) -> u32 {
        FRAME0 + self.0 as u32
    }

    /// Frame for a physical frame number, if it lies in a pool of `nframes`
    pub const fn from_pfn(pfn: u32, nframes: usize) -> Option<Self> {
        if pfn < FRAME0 {
            return None;
        }
        let idx = (pfn - FRAME0) as usize;
        if idx < nframes {
            Some(Self(idx))
        } else {
            None
        }
    }
}

impl core::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_pfn() {
        assert_eq!(FrameIndex(8).pfn(), 1032);
        assert_eq!(FrameIndex::from_pfn(1032, 1024), Some(FrameIndex(8)));
        assert_eq!(FrameIndex::from_pfn(12, 1024), None);
        assert_eq!(FrameIndex::from_pfn(FRAME0 + 64, 64), None);
    }

    #[test]
    fn test_ranges() {
        assert!(Pid(49).in_range());
        assert!(!Pid(50).in_range());
        assert!(StoreId(7).in_range());
        assert!(!StoreId(8).in_range());
    }
}
