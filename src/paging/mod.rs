//! Demand Paging
//!
//! Gives every process a virtual address space larger than physical memory.
//! Pages live in backing stores and are brought into frames on demand;
//! frames are reclaimed under second-chance replacement, and processes can
//! share a store through xmmap regions.
//!
//! ## Components
//!
//! - `vm_param`: Geometry constants and virtual address decomposition
//! - `pmap`: Entry layouts, the frame arena, translation-cache interface
//! - `backing_store`: Whole-page transfers to and from the backing region
//! - `bs_map`: Backing-store slot registry
//! - `xmm`: Shared mappings and the publish/invalidate protocol
//! - `vm_page`: Frame table
//! - `vm_pageout`: Replacement queue, eviction and frame release
//! - `vm_fault`: Page fault resolution and counters
//! - `vm_heap`: Virtual heap allocator
//! - `address_space`: Per-process setup and teardown
//! - `mmu`: Loads and stores through the page tables
//! - `pager`: The service object tying the above together

pub mod address_space;
pub mod backing_store;
pub mod bs_map;
pub mod mmu;
pub mod pager;
pub mod pmap;
pub mod vm_fault;
pub mod vm_heap;
pub mod vm_page;
pub mod vm_pageout;
pub mod vm_param;
pub mod xmm;

pub use address_space::{HeapRegion, ProcMemory};
pub use backing_store::{BackingDevice, BackingStore, SparseDevice};
pub use bs_map::{BackingStoreTable, StoreSlot};
pub use pager::Pager;
pub use pmap::{PdEntry, PhysicalMemory, PtEntry, SoftTlb, Tlb};
pub use vm_fault::{PagingStats, StatsSnapshot};
pub use vm_page::{FrameClaim, FrameDescriptor, FrameRole, FrameStatus, FrameTable};
pub use vm_pageout::{Probe, ReplacementQueue};
pub use vm_param::VirtAddr;
pub use xmm::{SharedMapping, SharedMappingTable};
