//! Frame Table
//!
//! Inverted page table over the managed frame pool: one descriptor per
//! frame naming its owner, the virtual page it holds, its reference count
//! and its role. The first `RESERVED_FRAMES` frames hold the boot page
//! tables and the null directory and are never handed out.

use alloc::vec;
use alloc::vec::Vec;

use crate::paging::vm_param::RESERVED_FRAMES;
use crate::types::{FrameIndex, Pid};

// ============================================================================
// Frame Descriptor
// ============================================================================

/// What a frame holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    /// Data page of a process
    Page,
    /// Page table
    PageTable,
    /// Page directory
    Directory,
}

/// Allocation status of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Free,
    Occupied,
}

/// Per-frame bookkeeping
///
/// For a table or directory, `refcount` is the number of present entries
/// in it. For a data page it is 1 while the page is mapped and 0 while the
/// frame is being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub status: FrameStatus,
    pub owner: Pid,
    /// Virtual page held (data pages only)
    pub vpn: u32,
    pub refcount: u32,
    pub role: FrameRole,
    /// Dirty shadow, set when the pager itself modifies the page
    pub dirty: bool,
}

impl FrameDescriptor {
    /// Descriptor of an unused frame
    pub const FREE: Self = Self {
        status: FrameStatus::Free,
        owner: Pid::NULL,
        vpn: 0,
        refcount: 0,
        role: FrameRole::Page,
        dirty: false,
    };

    pub fn is_occupied(&self) -> bool {
        self.status == FrameStatus::Occupied
    }

    /// Occupied data page
    pub fn is_page(&self) -> bool {
        self.is_occupied() && self.role == FrameRole::Page
    }
}

/// What a newly acquired frame will hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClaim {
    pub role: FrameRole,
    pub owner: Pid,
    pub vpn: u32,
}

impl FrameClaim {
    pub const fn page(owner: Pid, vpn: u32) -> Self {
        Self {
            role: FrameRole::Page,
            owner,
            vpn,
        }
    }

    pub const fn table(owner: Pid) -> Self {
        Self {
            role: FrameRole::PageTable,
            owner,
            vpn: 0,
        }
    }

    pub const fn directory(owner: Pid) -> Self {
        Self {
            role: FrameRole::Directory,
            owner,
            vpn: 0,
        }
    }
}

// ============================================================================
// Frame Table
// ============================================================================

/// Descriptors of the whole pool
#[derive(Debug, Clone)]
pub struct FrameTable {
    descs: Vec<FrameDescriptor>,
}

impl FrameTable {
    /// Table of `nframes` free frames
    pub fn new(nframes: usize) -> Self {
        Self {
            descs: vec![FrameDescriptor::FREE; nframes],
        }
    }

    /// Free every frame, reserved ones included
    pub fn reset(&mut self) {
        self.descs.fill(FrameDescriptor::FREE);
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Whether `f` belongs to the boot prefix
    pub fn is_reserved(&self, f: FrameIndex) -> bool {
        f.0 < RESERVED_FRAMES
    }

    pub fn get(&self, f: FrameIndex) -> Option<&FrameDescriptor> {
        self.descs.get(f.0)
    }

    pub fn get_mut(&mut self, f: FrameIndex) -> Option<&mut FrameDescriptor> {
        self.descs.get_mut(f.0)
    }

    /// Every descriptor with its frame
    pub fn iter(&self) -> impl Iterator<Item = (FrameIndex, &FrameDescriptor)> {
        self.descs.iter().enumerate().map(|(i, d)| (FrameIndex(i), d))
    }

    /// First free frame past the reserved prefix
    pub fn claim_free_frame(&self) -> Option<FrameIndex> {
        self.descs
            .iter()
            .enumerate()
            .skip(RESERVED_FRAMES)
            .find(|(_, d)| !d.is_occupied())
            .map(|(i, _)| FrameIndex(i))
    }

    /// Mark `f` occupied for `claim`, reference count zero
    pub fn occupy(&mut self, f: FrameIndex, claim: FrameClaim) {
        if let Some(d) = self.descs.get_mut(f.0) {
            *d = FrameDescriptor {
                status: FrameStatus::Occupied,
                owner: claim.owner,
                vpn: claim.vpn,
                refcount: 0,
                role: claim.role,
                dirty: false,
            };
        }
    }

    /// Return `f` to the free state
    pub fn clear(&mut self, f: FrameIndex) {
        if let Some(d) = self.descs.get_mut(f.0) {
            *d = FrameDescriptor::FREE;
        }
    }

    /// Adjust a reference count, returning the new value
    pub fn add_ref(&mut self, f: FrameIndex, delta: i32) -> u32 {
        match self.descs.get_mut(f.0) {
            Some(d) => {
                d.refcount = d.refcount.saturating_add_signed(delta);
                d.refcount
            }
            None => 0,
        }
    }

    /// Non-reserved frames owned by `pid`
    pub fn owned_by(&self, pid: Pid) -> Vec<FrameIndex> {
        self.iter()
            .skip(RESERVED_FRAMES)
            .filter(|(_, d)| d.is_occupied() && d.owner == pid)
            .map(|(f, _)| f)
            .collect()
    }

    /// Unoccupied frames past the reserved prefix
    pub fn free_count(&self) -> usize {
        self.descs
            .iter()
            .skip(RESERVED_FRAMES)
            .filter(|d| !d.is_occupied())
            .count()
    }
}
