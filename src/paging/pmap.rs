//! Physical Map - Page Directories, Page Tables and the Frame Arena
//!
//! Page directories and page tables live inside managed frames exactly like
//! data pages do. Each entry is a 32-bit word; the frame field is a plain
//! physical frame number, never a pointer.
//!
//! ## Entry Layout
//!
//! ```text
//!  31                    12 11   7 6 5 4 3 2 1 0
//! +------------------------+------+-+-+-+-+-+-+-+
//! |   physical frame no.   | avl  |D|A|C|T|U|W|P|
//! +------------------------+------+-+-+-+-+-+-+-+
//! ```
//!
//! `D` (dirty) is meaningful only in page-table entries.

use alloc::vec;
use alloc::vec::Vec;

use crate::paging::vm_param::{ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::types::FrameIndex;

// ============================================================================
// Entry Flags
// ============================================================================

/// Flag bits shared by directory and table entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFlags(u32);

impl EntryFlags {
    /// Entry is present
    pub const PRESENT: Self = Self(1 << 0);
    /// Writable
    pub const WRITE: Self = Self(1 << 1);
    /// User accessible
    pub const USER: Self = Self(1 << 2);
    /// Write-through caching
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    /// Caching disabled
    pub const NO_CACHE: Self = Self(1 << 4);
    /// Accessed since the bit was last cleared
    pub const ACCESSED: Self = Self(1 << 5);
    /// Written since the bit was last cleared (table entries only)
    pub const DIRTY: Self = Self(1 << 6);

    /// Empty flags
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Get bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Check if contains flags
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union with another flags
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Mask of the physical frame number field
const FRAME_MASK: u32 = 0xFFFF_F000;

/// Shift of the physical frame number field
const FRAME_SHIFT: u32 = 12;

macro_rules! entry_accessors {
    ($ty:ident) => {
        impl $ty {
            /// Entry with every bit clear
            pub const fn zero() -> Self {
                Self(0)
            }

            /// Entry pointing at `pfn` with `flags`
            pub const fn new(pfn: u32, flags: EntryFlags) -> Self {
                Self(((pfn << FRAME_SHIFT) & FRAME_MASK) | flags.bits())
            }

            /// Raw word
            pub const fn bits(self) -> u32 {
                self.0
            }

            const fn bit(self, flag: EntryFlags) -> bool {
                self.0 & flag.bits() != 0
            }

            fn assign(&mut self, flag: EntryFlags, on: bool) {
                if on {
                    self.0 |= flag.bits();
                } else {
                    self.0 &= !flag.bits();
                }
            }

            pub const fn present(self) -> bool {
                self.bit(EntryFlags::PRESENT)
            }

            pub fn set_present(&mut self, on: bool) {
                self.assign(EntryFlags::PRESENT, on);
            }

            pub const fn writable(self) -> bool {
                self.bit(EntryFlags::WRITE)
            }

            pub fn set_writable(&mut self, on: bool) {
                self.assign(EntryFlags::WRITE, on);
            }

            pub const fn user(self) -> bool {
                self.bit(EntryFlags::USER)
            }

            pub const fn accessed(self) -> bool {
                self.bit(EntryFlags::ACCESSED)
            }

            pub fn set_accessed(&mut self, on: bool) {
                self.assign(EntryFlags::ACCESSED, on);
            }

            /// Physical frame number (20 bits)
            pub const fn pfn(self) -> u32 {
                (self.0 & FRAME_MASK) >> FRAME_SHIFT
            }

            pub fn set_pfn(&mut self, pfn: u32) {
                self.0 = (self.0 & !FRAME_MASK) | ((pfn << FRAME_SHIFT) & FRAME_MASK);
            }
        }
    };
}

/// Page-directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PdEntry(u32);

entry_accessors!(PdEntry);

/// Page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtEntry(u32);

entry_accessors!(PtEntry);

impl PtEntry {
    pub const fn dirty(self) -> bool {
        self.bit(EntryFlags::DIRTY)
    }

    pub fn set_dirty(&mut self, on: bool) {
        self.assign(EntryFlags::DIRTY, on);
    }
}

/// Flags of a freshly installed mapping
pub const MAPPED: EntryFlags = EntryFlags::PRESENT.union(EntryFlags::WRITE);

// ============================================================================
// Frame Arena
// ============================================================================

/// The managed frame pool as a flat byte arena
///
/// Frame `i` occupies bytes `i * PAGE_SIZE .. (i + 1) * PAGE_SIZE`.
pub struct PhysicalMemory {
    bytes: Vec<u8>,
    nframes: usize,
}

impl PhysicalMemory {
    /// Zero-filled pool of `nframes` frames
    pub fn new(nframes: usize) -> Self {
        Self {
            bytes: vec![0; nframes * PAGE_SIZE],
            nframes,
        }
    }

    /// Frames in the pool
    pub fn nframes(&self) -> usize {
        self.nframes
    }

    /// Frame for a physical frame number, if it lies in the pool
    pub fn frame_of(&self, pfn: u32) -> Option<FrameIndex> {
        FrameIndex::from_pfn(pfn, self.nframes)
    }

    /// Contents of a frame
    ///
    /// Panics on an out-of-range frame; callers hold indices the frame
    /// table handed out.
    pub fn frame(&self, f: FrameIndex) -> &[u8] {
        let start = f.0 * PAGE_SIZE;
        &self.bytes[start..start + PAGE_SIZE]
    }

    /// Mutable contents of a frame
    pub fn frame_mut(&mut self, f: FrameIndex) -> &mut [u8] {
        let start = f.0 * PAGE_SIZE;
        &mut self.bytes[start..start + PAGE_SIZE]
    }

    /// Zero a frame
    pub fn zero(&mut self, f: FrameIndex) {
        self.frame_mut(f).fill(0);
    }

    /// Little-endian word at `offset` within a frame
    pub fn read_u32(&self, f: FrameIndex, offset: usize) -> u32 {
        let b = &self.frame(f)[offset..offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Store a little-endian word at `offset` within a frame
    pub fn write_u32(&mut self, f: FrameIndex, offset: usize, value: u32) {
        self.frame_mut(f)[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Directory entry `idx` of the directory held in `pd`
    pub fn pde(&self, pd: FrameIndex, idx: usize) -> PdEntry {
        debug_assert!(idx < ENTRIES_PER_TABLE);
        PdEntry(self.read_u32(pd, idx * 4))
    }

    pub fn set_pde(&mut self, pd: FrameIndex, idx: usize, entry: PdEntry) {
        debug_assert!(idx < ENTRIES_PER_TABLE);
        self.write_u32(pd, idx * 4, entry.0);
    }

    /// Table entry `idx` of the table held in `pt`
    pub fn pte(&self, pt: FrameIndex, idx: usize) -> PtEntry {
        debug_assert!(idx < ENTRIES_PER_TABLE);
        PtEntry(self.read_u32(pt, idx * 4))
    }

    pub fn set_pte(&mut self, pt: FrameIndex, idx: usize, entry: PtEntry) {
        debug_assert!(idx < ENTRIES_PER_TABLE);
        self.write_u32(pt, idx * 4, entry.0);
    }

    /// Fill a table frame with not-present, writable entries
    pub fn init_table(&mut self, f: FrameIndex) {
        let blank = PtEntry::new(0, EntryFlags::WRITE);
        for idx in 0..ENTRIES_PER_TABLE {
            self.set_pte(f, idx, blank);
        }
    }
}

// ============================================================================
// Translation Cache
// ============================================================================

/// Translation-cache invalidation, implemented per platform
pub trait Tlb {
    /// Drop the cached translation for one address
    fn invalidate(&mut self, vaddr: u32);

    /// Drop every cached translation
    fn invalidate_all(&mut self);
}

/// Hosted translation cache: there is nothing cached, so it only counts
#[derive(Debug, Default, Clone)]
pub struct SoftTlb {
    /// Single-address invalidations
    pub invalidations: u64,
    /// Full flushes
    pub flushes: u64,
    /// Last address invalidated
    pub last: Option<u32>,
}

impl SoftTlb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tlb for SoftTlb {
    fn invalidate(&mut self, vaddr: u32) {
        self.invalidations += 1;
        self.last = Some(vaddr);
    }

    fn invalidate_all(&mut self) {
        self.flushes += 1;
    }
}
