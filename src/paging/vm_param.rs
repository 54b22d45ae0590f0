//! Paging Parameters
//!
//! Architectural constants of the two-level 32-bit paging layout and the
//! fixed geometry of the frame pool and backing stores, plus the virtual
//! address decomposition helpers.

// ============================================================================
// Page Geometry
// ============================================================================

/// Bytes per page (and per frame)
pub const PAGE_SIZE: usize = 4096;

/// log2 of PAGE_SIZE
pub const PAGE_SHIFT: u32 = 12;

/// Entries in a page directory or page table
pub const ENTRIES_PER_TABLE: usize = 1024;

// ============================================================================
// Frame Pool
// ============================================================================

/// Physical frame number of the first managed frame
pub const FRAME0: u32 = 1024;

/// Maximum number of managed frames
pub const NFRAMES: usize = 1024;

/// Frames reserved at boot: four global page tables and the null directory
pub const RESERVED_FRAMES: usize = 5;

/// Global page tables identity-mapping the low region
pub const GLOBAL_PAGE_TABLES: usize = 4;

/// Frame holding the null process's page directory
pub const NULL_DIRECTORY_FRAME: usize = 4;

// ============================================================================
// Backing Stores
// ============================================================================

/// Number of backing-store slots
pub const MAX_STORES: usize = 8;

/// Pages held by one backing store
pub const STORE_PAGES: usize = 256;

/// Byte address of store 0 in the flat backing region
pub const BACKING_STORE_BASE: usize = 0x0080_0000;

/// Distance between consecutive stores in the flat backing region
pub const BACKING_STORE_UNIT_SIZE: usize = 0x0010_0000;

// ============================================================================
// Processes and Address Space Layout
// ============================================================================

/// Process table size
pub const NPROC: usize = 50;

/// Pages in the identity-mapped low region (first 16 MiB)
pub const LOW_REGION_PAGES: u32 = 4096;

/// First virtual page of a process's virtual heap
pub const HEAP_BASE_VPN: u32 = 4096;

/// Shared-mapping table capacity
pub const MAX_SHARED_MAPPINGS: usize = MAX_STORES * NPROC;

/// Directory slots covered by the global page tables
pub const LOW_REGION_PD_ENTRIES: usize = (LOW_REGION_PAGES as usize) / ENTRIES_PER_TABLE;

// ============================================================================
// Virtual Addresses
// ============================================================================

/// A 32-bit virtual address: directory index (10) | table index (10) | offset (12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    /// Address of the first byte of a virtual page
    pub const fn from_vpn(vpn: u32) -> Self {
        Self(vpn << PAGE_SHIFT)
    }

    /// Page directory index (bits 31..22)
    pub const fn pd_index(self) -> usize {
        ((self.0 >> 22) & 0x3FF) as usize
    }

    /// Page table index (bits 21..12)
    pub const fn pt_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    /// Byte offset within the page (bits 11..0)
    pub const fn offset(self) -> usize {
        (self.0 & 0xFFF) as usize
    }

    /// Virtual page number
    pub const fn vpn(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// Round down to the page boundary
    pub const fn page_base(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    /// Whether the address lies in the identity-mapped low region
    pub const fn is_low_region(self) -> bool {
        self.vpn() < LOW_REGION_PAGES
    }
}

/// Virtual page number composed from directory and table indices
pub const fn vpn_of(pd_index: usize, pt_index: usize) -> u32 {
    ((pd_index << 10) | pt_index) as u32
}
